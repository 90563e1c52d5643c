use crate::memory_store::MemoryStore;
use crate::rpc::{self, GetValuesParams, GetValuesResult, PasteParams, PasteResult};
use crate::schema::VariableKey;
use crate::value::RawValue;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not construct the HTTP client")]
    CreateReqwest(#[source] reqwest::Error),
    #[error("batched read of {1} keys failed")]
    Read(#[source] reqwest::Error, usize),
    #[error("batched write of {1} keys failed")]
    Write(#[source] reqwest::Error, usize),
    #[error("store returned a malformed JSON-RPC response")]
    DecodeResponse(#[source] reqwest::Error),
    #[error("store answered request {1} with a response to request {0}")]
    MismatchedId(u64, u64),
    #[error("store responded with neither a result nor an error")]
    EmptyResponse,
    #[error("store reported error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("store returned {got} values for {requested} keys")]
    Misaligned { requested: usize, got: usize },
    #[error("store reported status {status} for `{key}`")]
    KeyStatus { key: VariableKey, status: i64 },
    #[error("no such key `{0}`")]
    UnknownKey(VariableKey),
    #[error("`{0}` is not an array")]
    NotAnArray(VariableKey),
    #[error("`{key}` has {len} elements, the index is out of bounds")]
    IndexOutOfBounds { key: VariableKey, len: usize },
    #[error("a write of {keys} keys was given {values} values")]
    WriteLengthMismatch { keys: usize, values: usize },
    #[error("could not read the snapshot at {1:?}")]
    OpenSnapshot(#[source] std::io::Error, PathBuf),
    #[error("could not parse the snapshot at {1:?}")]
    ParseSnapshot(#[source] serde_json::Error, PathBuf),
    #[error("snapshot at {0:?} is not a JSON object")]
    SnapshotIsntObject(PathBuf),
}

/// A remote store accessed through batched, order-preserving reads and writes.
///
/// A successful read returns exactly one value per key, with `values[i]` belonging to `keys[i]`.
/// A failure of any kind fails the whole batch; partial results are never returned. Writes
/// likewise either report success for all keys or a single error. The store itself provides no
/// cross-key atomicity, so callers order writes such that an interrupted batch leaves the device
/// in a safe state.
pub trait Store: Send + Sync + 'static {
    fn read_batch(
        &self,
        keys: &[VariableKey],
    ) -> impl Future<Output = Result<Vec<RawValue>, Error>> + Send;

    fn write_batch(
        &self,
        keys: &[VariableKey],
        values: &[RawValue],
    ) -> impl Future<Output = Result<(), Error>> + Send;
}

#[derive(clap::Parser, Clone)]
#[group(id = "connection::Args")]
pub struct Args {
    #[clap(flatten)]
    how: ConnectionGroup,

    /// Consider a batched read failed if it does not complete in this amount of time.
    #[arg(long, default_value = "1s")]
    read_timeout: humantime::Duration,

    /// Consider a batched write failed if it does not complete in this amount of time.
    #[arg(long, default_value = "3s")]
    write_timeout: humantime::Duration,
}

#[derive(clap::Parser, Clone)]
#[group(required = true)]
pub struct ConnectionGroup {
    /// The JSON-RPC endpoint of the store (e.g. `http://daq:8080/?mjsonrpc`).
    #[arg(long)]
    url: Option<reqwest::Url>,
    /// Serve reads and writes from an in-memory store seeded with this JSON snapshot.
    ///
    /// The snapshot is an object mapping full key paths to values.
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

/// The store selected on the command line.
pub enum Connection {
    JsonRpc(JsonRpcStore),
    Memory(MemoryStore),
}

impl Connection {
    pub async fn new(args: Args) -> Result<Connection, Error> {
        if let Some(url) = args.how.url {
            Ok(Connection::JsonRpc(JsonRpcStore::new(
                url,
                *args.read_timeout,
                *args.write_timeout,
            )?))
        } else if let Some(path) = args.how.snapshot {
            Ok(Connection::Memory(MemoryStore::from_snapshot(&path).await?))
        } else {
            panic!("both `--url` and `--snapshot` are `None`?");
        }
    }
}

impl Store for Connection {
    async fn read_batch(&self, keys: &[VariableKey]) -> Result<Vec<RawValue>, Error> {
        match self {
            Connection::JsonRpc(s) => s.read_batch(keys).await,
            Connection::Memory(s) => s.read_batch(keys).await,
        }
    }

    async fn write_batch(&self, keys: &[VariableKey], values: &[RawValue]) -> Result<(), Error> {
        match self {
            Connection::JsonRpc(s) => s.write_batch(keys, values).await,
            Connection::Memory(s) => s.write_batch(keys, values).await,
        }
    }
}

pub struct JsonRpcStore {
    http: reqwest::Client,
    url: reqwest::Url,
    read_timeout: Duration,
    write_timeout: Duration,
    request_id_generator: AtomicU64,
}

impl JsonRpcStore {
    pub fn new(
        url: reqwest::Url,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .read_timeout(read_timeout.max(write_timeout))
            .build()
            .map_err(Error::CreateReqwest)?;
        Ok(Self { http, url, read_timeout, write_timeout, request_id_generator: AtomicU64::new(1) })
    }

    fn new_request_id(&self) -> u64 {
        self.request_id_generator.fetch_add(1, Ordering::Relaxed)
    }

    /// Send a single JSON-RPC call and unpack its `result`.
    async fn call<P: serde::Serialize, R: serde::de::DeserializeOwned>(
        &self,
        method: &'static str,
        params: P,
        timeout: Duration,
        transport_error: impl FnOnce(reqwest::Error) -> Error,
    ) -> Result<R, Error> {
        let id = self.new_request_id();
        let request = rpc::Request::new(method, params, id);
        trace!(message = "sending request", method, id);
        let response = self
            .http
            .post(self.url.clone())
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(transport_error)?;
        let response = response
            .json::<rpc::Response<R>>()
            .await
            .map_err(Error::DecodeResponse)?;
        if let Some(response_id) = response.id {
            if response_id != id {
                return Err(Error::MismatchedId(response_id, id));
            }
        }
        match (response.result, response.error) {
            (_, Some(e)) => Err(Error::Rpc { code: e.code, message: e.message }),
            (Some(result), None) => Ok(result),
            (None, None) => Err(Error::EmptyResponse),
        }
    }
}

impl Store for JsonRpcStore {
    async fn read_batch(&self, keys: &[VariableKey]) -> Result<Vec<RawValue>, Error> {
        let count = keys.len();
        let result: GetValuesResult = self
            .call(rpc::GET_VALUES, GetValuesParams::new(keys), self.read_timeout, |e| {
                Error::Read(e, count)
            })
            .await?;
        if let Some((key, status)) = rpc::first_failure(keys, &result.status) {
            return Err(Error::KeyStatus { key: key.clone(), status });
        }
        if result.data.len() != count {
            return Err(Error::Misaligned { requested: count, got: result.data.len() });
        }
        debug!(message = "read batch", keys = count);
        Ok(result.data)
    }

    async fn write_batch(&self, keys: &[VariableKey], values: &[RawValue]) -> Result<(), Error> {
        if keys.len() != values.len() {
            return Err(Error::WriteLengthMismatch { keys: keys.len(), values: values.len() });
        }
        let count = keys.len();
        let result: PasteResult = self
            .call(rpc::PASTE, PasteParams { paths: keys, values }, self.write_timeout, |e| {
                Error::Write(e, count)
            })
            .await?;
        if let Some((key, status)) = rpc::first_failure(keys, &result.status) {
            return Err(Error::KeyStatus { key: key.clone(), status });
        }
        debug!(message = "wrote batch", keys = count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser as _;
    use serde_json::{Value, json};
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn exactly_one_store_is_chosen() {
        assert!(Args::try_parse_from(["odb-console"]).is_err());
        assert!(
            Args::try_parse_from([
                "odb-console",
                "--url",
                "http://daq:8080/?mjsonrpc",
                "--snapshot",
                "snapshot.json",
            ])
            .is_err()
        );
        let args = Args::try_parse_from([
            "odb-console",
            "--url",
            "http://daq:8080/?mjsonrpc",
            "--read-timeout",
            "250ms",
        ])
        .unwrap();
        assert_eq!(*args.read_timeout, Duration::from_millis(250));
        assert_eq!(*args.write_timeout, Duration::from_secs(3));
        assert!(args.how.snapshot.is_none());
    }

    #[tokio::test]
    async fn requests_outside_the_batch_contract_never_leave() {
        let store = JsonRpcStore::new(
            "http://127.0.0.1:9/".parse().unwrap(),
            Duration::from_millis(50),
            Duration::from_millis(50),
        )
        .unwrap();
        let keys = [VariableKey::new_const("/Equipment/GalilFermi/Settings/Manual Control/Cmd")];
        let err = store.write_batch(&keys, &[]).await.unwrap_err();
        assert!(matches!(err, Error::WriteLengthMismatch { keys: 1, values: 0 }));
        assert_eq!(store.new_request_id(), 1);
    }

    const KEYS: [VariableKey; 2] = [
        VariableKey::new_const("/Equipment/CompressorChiller/Variables/sta1"),
        VariableKey::new_const("/Equipment/HeLevel/Variables/HeLe"),
    ];

    /// Answer every JSON-RPC request with whatever `answer` makes of it. `None` leaves the
    /// request hanging.
    async fn serve(answer: impl Fn(&Value) -> Option<Value> + Send + 'static) -> JsonRpcStore {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/?mjsonrpc", listener.local_addr().unwrap());
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let request = read_request(&mut socket).await;
                let Some(body) = answer(&request) else {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    return;
                };
                let body = body.to_string();
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\n\
                     content-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                let _closing = socket.shutdown().await;
            }
        });
        let timeout = Duration::from_millis(200);
        JsonRpcStore::new(url.parse().unwrap(), timeout, timeout).unwrap()
    }

    async fn read_request(socket: &mut TcpStream) -> Value {
        let mut buffer = Vec::new();
        let mut chunk = [0; 4096];
        loop {
            let read = socket.read(&mut chunk).await.unwrap();
            assert_ne!(read, 0, "connection closed mid-request");
            buffer.extend_from_slice(&chunk[..read]);
            let Some(end) = buffer.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buffer[..end]).to_ascii_lowercase();
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .map_or(0, |len| len.trim().parse().unwrap());
            let body = end + 4;
            if buffer.len() >= body + length {
                return serde_json::from_slice(&buffer[body..body + length]).unwrap();
            }
        }
    }

    fn reply(request: &Value, result: Value) -> Option<Value> {
        Some(json!({ "jsonrpc": "2.0", "result": result, "id": request["id"] }))
    }

    #[tokio::test]
    async fn reads_come_back_in_key_order() {
        let store = serve(|request| {
            assert_eq!(request["method"], "db_get_values");
            assert_eq!(request["params"]["paths"], json!(KEYS));
            reply(request, json!({ "data": [1, 71.5], "status": [1, 1] }))
        })
        .await;
        assert_eq!(store.read_batch(&KEYS).await.unwrap(), [json!(1), json!(71.5)]);
    }

    #[tokio::test]
    async fn short_reads_are_misaligned() {
        let store = serve(|request| reply(request, json!({ "data": [1], "status": [1] }))).await;
        let err = store.read_batch(&KEYS).await.unwrap_err();
        assert!(matches!(err, Error::Misaligned { requested: 2, got: 1 }));
    }

    #[tokio::test]
    async fn one_failed_key_fails_the_batch() {
        let store = serve(|request| match request["method"].as_str() {
            Some(rpc::GET_VALUES) => {
                reply(request, json!({ "data": [1, null], "status": [1, 312] }))
            }
            _ => reply(request, json!({ "status": [307, 1] })),
        })
        .await;
        let err = store.read_batch(&KEYS).await.unwrap_err();
        assert!(matches!(err, Error::KeyStatus { ref key, status: 312 } if *key == KEYS[1]));
        let err = store.write_batch(&KEYS, &[json!(0), json!(0)]).await.unwrap_err();
        assert!(matches!(err, Error::KeyStatus { ref key, status: 307 } if *key == KEYS[0]));
    }

    #[tokio::test]
    async fn answers_to_other_requests_are_refused() {
        let store = serve(|request| {
            let id = request["id"].as_u64().unwrap();
            Some(json!({ "jsonrpc": "2.0", "result": { "data": [] }, "id": id + 100 }))
        })
        .await;
        let err = store.read_batch(&KEYS).await.unwrap_err();
        assert!(matches!(err, Error::MismatchedId(101, 1)));
    }

    #[tokio::test]
    async fn rpc_errors_fail_the_call() {
        let store = serve(|request| match request["method"].as_str() {
            Some(rpc::GET_VALUES) => Some(json!({
                "jsonrpc": "2.0",
                "error": { "code": -32601, "message": "method not found" },
                "id": request["id"],
            })),
            _ => Some(json!({ "jsonrpc": "2.0", "id": request["id"] })),
        })
        .await;
        let err = store.read_batch(&KEYS).await.unwrap_err();
        assert_eq!(err.to_string(), "store reported error -32601: method not found");
        let err = store.write_batch(&KEYS, &[json!(1), json!(2)]).await.unwrap_err();
        assert!(matches!(err, Error::EmptyResponse));
    }

    #[tokio::test]
    async fn slow_stores_time_out_as_read_errors() {
        let store = serve(|_| None).await;
        let err = store.read_batch(&KEYS).await.unwrap_err();
        assert!(matches!(err, Error::Read(ref e, 2) if e.is_timeout()), "{err:?}");
    }
}
