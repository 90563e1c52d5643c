use crate::decode::DecodedRecord;
use csv_core::WriteResult;
use std::path::PathBuf;

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Table,
    Jsonl,
    Csv,
}

#[derive(clap::Parser)]
#[group(id = "output::Args")]
pub struct Args {
    /// Write to this file instead of the terminal.
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
    #[arg(long, short = 'f', value_enum, default_value_t = Format::Table)]
    format: Format,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not open the specified output file at {1:?}")]
    OpenOutputFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the output file at {1:?}")]
    WriteFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the terminal")]
    WriteStdout(#[source] std::io::Error),
    #[error("could not serialize output as JSON")]
    SerializeJson(#[source] serde_json::Error),
}

const RECORD_HEADERS: [&str; 4] = ["Page", "Polled at", "Field", "Value"];

impl Args {
    pub fn to_output(self) -> Result<Output, Error> {
        let io = match &self.output {
            None => Box::new(std::io::stdout().lock()) as Box<_>,
            Some(path) => Box::new(
                std::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(|e| Error::OpenOutputFile(e, path.clone()))?,
            ) as Box<_>,
        };
        let formatter = match self.format {
            Format::Table => Formatter::Table { comfy: new_table(), headers: Vec::new() },
            Format::Jsonl => Formatter::Jsonl,
            Format::Csv => Formatter::Csv { written_rows: false },
        };
        Ok(Output { path: self.output, io, formatter })
    }
}

fn new_table() -> comfy_table::Table {
    let mut comfy = comfy_table::Table::new();
    comfy.set_content_arrangement(comfy_table::ContentArrangement::Dynamic);
    comfy
}

pub struct Output {
    path: Option<PathBuf>,
    io: Box<dyn std::io::Write>,
    formatter: Formatter,
}

enum Formatter {
    Csv { written_rows: bool },
    Table { comfy: comfy_table::Table, headers: Vec<&'static str> },
    Jsonl,
}

impl Output {
    /// Set the column headers. Must come before any row.
    pub fn table_headers(&mut self, hdrs: Vec<&'static str>) -> Result<(), Error> {
        match &mut self.formatter {
            Formatter::Csv { written_rows } => {
                if *written_rows {
                    panic!("table headers for csv must be written very first!");
                }
                *written_rows = true;
                self.write_csv_row(&hdrs)?;
            }
            Formatter::Table { comfy, headers } => {
                comfy.set_header(hdrs.clone());
                *headers = hdrs;
            }
            Formatter::Jsonl => {}
        }
        Ok(())
    }

    /// Output one result, either as a table row or as one JSON line.
    pub fn result<R: serde::Serialize>(
        &mut self,
        table_row: impl FnOnce() -> Vec<String>,
        serde_record: impl FnOnce() -> R,
    ) -> Result<(), Error> {
        match &mut self.formatter {
            Formatter::Csv { written_rows } => {
                *written_rows = true;
                let values = table_row();
                self.write_csv_row(&values)?;
            }
            Formatter::Table { comfy, .. } => {
                comfy.add_row(table_row());
            }
            Formatter::Jsonl => self.write_json_line(&serde_record())?,
        }
        Ok(())
    }

    pub fn record_headers(&mut self) -> Result<(), Error> {
        self.table_headers(RECORD_HEADERS.to_vec())
    }

    /// Output a decoded record: one row per field, or the whole record as one JSON line.
    pub fn record(&mut self, record: &DecodedRecord) -> Result<(), Error> {
        if let Formatter::Jsonl = self.formatter {
            return self.write_json_line(record);
        }
        let polled_at = record.polled_at.to_string();
        for field in &record.fields {
            let value = match &field.value {
                Ok(value) => value.to_string(),
                Err(e) => format!("error: {e}"),
            };
            let row = || {
                vec![record.page.to_string(), polled_at.clone(), field.name.to_string(), value]
            };
            self.result(row, || ())?;
        }
        Ok(())
    }

    /// Make everything output so far visible.
    ///
    /// Tables are rendered as they are and a fresh table with the same headers is started.
    pub fn flush(&mut self) -> Result<(), Error> {
        if let Formatter::Table { comfy, headers } = &mut self.formatter {
            let mut next = new_table();
            if !headers.is_empty() {
                next.set_header(headers.clone());
            }
            let table = std::mem::replace(comfy, next);
            writeln!(self.io, "{table}").map_err(|e| self.write_error(e))?;
        }
        self.io.flush().map_err(|e| self.write_error(e))
    }

    fn write_json_line<R: serde::Serialize + ?Sized>(&mut self, record: &R) -> Result<(), Error> {
        serde_json::to_writer(&mut self.io, record).map_err(Error::SerializeJson)?;
        writeln!(self.io).map_err(|e| self.write_error(e))
    }

    fn write_csv_row<V: std::ops::Deref<Target = str>>(
        &mut self,
        values: &[V],
    ) -> Result<(), Error> {
        // Worst case every byte is a quote that needs escaping, plus the surrounding quotes.
        let max_len = 2 + 2 * values.iter().map(|v| v.len()).max().unwrap_or(0);
        let mut buffer = vec![0; max_len];
        let mut writer = csv_core::Writer::new();
        for (idx, value) in values.iter().enumerate() {
            if idx != 0 {
                let (WriteResult::InputEmpty, ob) = writer.delimiter(&mut buffer) else {
                    panic!("csv delimiter does not fit the buffer");
                };
                self.io.write_all(&buffer[..ob]).map_err(|e| self.write_error(e))?;
            }
            let (WriteResult::InputEmpty, ib, ob) = writer.field(value.as_bytes(), &mut buffer)
            else {
                panic!("csv field does not fit the buffer");
            };
            assert_eq!(value.len(), ib);
            self.io.write_all(&buffer[..ob]).map_err(|e| self.write_error(e))?;
        }
        let (WriteResult::InputEmpty, ob) = writer.terminator(&mut buffer) else {
            panic!("csv terminator does not fit the buffer");
        };
        self.io.write_all(&buffer[..ob]).map_err(|e| self.write_error(e))
    }

    fn write_error(&self, e: std::io::Error) -> Error {
        match &self.path {
            None => Error::WriteStdout(e),
            Some(p) => Error::WriteFile(e, p.clone()),
        }
    }

    pub fn commit(mut self) -> Result<(), Error> {
        if let Formatter::Table { comfy, .. } = &self.formatter {
            if comfy.row_iter().next().is_some() {
                self.io.write_fmt(format_args!("{comfy}\n")).map_err(|e| self.write_error(e))?;
            }
        }
        self.io.flush().map_err(|e| self.write_error(e))
    }
}
