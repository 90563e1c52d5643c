use crate::connection::{Error, Store};
use crate::schema::VariableKey;
use crate::value::RawValue;
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A store held entirely in memory.
///
/// Keys are full paths. Array-valued keys can be addressed element-wise with the `[i]` and
/// `[a-b]` suffixes, both for reading and for writing.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, RawValue>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<K: Into<String>>(values: impl IntoIterator<Item = (K, RawValue)>) -> Self {
        let values = values.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self { values: Mutex::new(values), ..Self::default() }
    }

    /// Load a snapshot: a JSON object mapping full key paths to their values.
    pub async fn from_snapshot(path: &Path) -> Result<Self, Error> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| Error::OpenSnapshot(e, path.to_path_buf()))?;
        let snapshot: RawValue = serde_json::from_slice(&bytes)
            .map_err(|e| Error::ParseSnapshot(e, path.to_path_buf()))?;
        let RawValue::Object(map) = snapshot else {
            return Err(Error::SnapshotIsntObject(path.to_path_buf()));
        };
        tracing::info!(message = "loaded snapshot", ?path, keys = map.len());
        Ok(Self::with_values(map))
    }

    pub fn value_of(&self, key: &str) -> Option<RawValue> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        lookup(&values, &VariableKey::new(key)).ok()
    }

    /// Replace the value stored under `key`, creating the key if necessary.
    ///
    /// Returns `true` if the value has changed.
    pub fn set_value(&self, key: impl Into<String>, value: RawValue) -> bool {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        let key = key.into();
        let changed = values.get(&key) != Some(&value);
        values.insert(key, value);
        changed
    }

    /// Number of batched reads served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of batched writes applied so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

impl Store for MemoryStore {
    async fn read_batch(&self, keys: &[VariableKey]) -> Result<Vec<RawValue>, Error> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        keys.iter().map(|key| lookup(&values, key)).collect()
    }

    async fn write_batch(&self, keys: &[VariableKey], values: &[RawValue]) -> Result<(), Error> {
        if keys.len() != values.len() {
            return Err(Error::WriteLengthMismatch { keys: keys.len(), values: values.len() });
        }
        let mut stored = self.values.lock().unwrap_or_else(|e| e.into_inner());
        // Stage every assignment first so that a bad key leaves the store untouched.
        let mut staged = BTreeMap::<String, RawValue>::new();
        for (key, value) in keys.iter().zip(values) {
            let (base, range) = key.split_index();
            let current = staged
                .get(base)
                .or_else(|| stored.get(base))
                .ok_or_else(|| Error::UnknownKey(key.clone()))?;
            let updated = match range {
                None => value.clone(),
                Some(range) => assign_elements(key, current.clone(), range, value)?,
            };
            staged.insert(base.to_string(), updated);
        }
        stored.extend(staged);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn lookup(values: &BTreeMap<String, RawValue>, key: &VariableKey) -> Result<RawValue, Error> {
    let (base, range) = key.split_index();
    let value = values.get(base).ok_or_else(|| Error::UnknownKey(key.clone()))?;
    let Some(range) = range else {
        return Ok(value.clone());
    };
    let RawValue::Array(items) = value else {
        return Err(Error::NotAnArray(key.clone()));
    };
    let (from, to) = (*range.start(), *range.end());
    if to >= items.len() {
        return Err(Error::IndexOutOfBounds { key: key.clone(), len: items.len() });
    }
    if from == to {
        Ok(items[from].clone())
    } else {
        Ok(RawValue::Array(items[from..=to].to_vec()))
    }
}

fn assign_elements(
    key: &VariableKey,
    current: RawValue,
    range: RangeInclusive<usize>,
    value: &RawValue,
) -> Result<RawValue, Error> {
    let RawValue::Array(mut items) = current else {
        return Err(Error::NotAnArray(key.clone()));
    };
    if *range.end() >= items.len() {
        return Err(Error::IndexOutOfBounds { key: key.clone(), len: items.len() });
    }
    let width = range.clone().count();
    match value {
        RawValue::Array(new) if width > 1 => {
            if new.len() != width {
                return Err(Error::WriteLengthMismatch { keys: width, values: new.len() });
            }
            for (slot, new) in items[range].iter_mut().zip(new) {
                *slot = new.clone();
            }
        }
        scalar => {
            for slot in &mut items[range] {
                *slot = scalar.clone();
            }
        }
    }
    Ok(RawValue::Array(items))
}
