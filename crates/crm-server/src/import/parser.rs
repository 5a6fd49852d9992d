//! Byte-accurate streaming CSV parser.
//!
//! Opens the source file at an arbitrary absolute byte offset and emits one
//! header->value map per row, together with the absolute offset consumed so
//! far. That offset is the resume cursor persisted in the job checkpoint.
//!
//! The first logical line at offset 0 is the header row; when the stream is
//! opened mid-file (resume) the caller supplies the header, which is stable
//! for the lifetime of a job. Parsing runs on a dedicated thread feeding a
//! bounded channel, so a slow consumer applies backpressure to disk reads
//! and dropping the receiver cancels the stream.

use csv::{ReaderBuilder, StringRecord, Trim};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;

/// Rows buffered between the reader thread and the worker.
const CHANNEL_CAPACITY: usize = 1_024;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed CSV in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{path} has no header row")]
    MissingHeader { path: PathBuf },
}

/// One parsed row plus the absolute number of file bytes consumed once the
/// row was emitted.
#[derive(Debug, Clone)]
pub struct ParsedRow {
    pub fields: HashMap<String, String>,
    pub offset: u64,
}

/// Forward-only CSV stream over one file region.
pub struct CsvStream {
    reader: csv::Reader<File>,
    headers: Vec<String>,
    path: PathBuf,
    start_offset: u64,
    record: StringRecord,
}

impl CsvStream {
    /// Open `path` at `start_offset` with a bounded read buffer.
    ///
    /// At offset 0 the header row is read from the file and `headers` must
    /// be `None`; at any other offset the caller supplies the header.
    pub fn open(
        path: impl AsRef<Path>,
        start_offset: u64,
        buffer_capacity: usize,
        headers: Option<Vec<String>>,
    ) -> Result<Self, ParseError> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).map_err(|source| ParseError::Io {
            path: path.clone(),
            source,
        })?;
        file.seek(SeekFrom::Start(start_offset))
            .map_err(|source| ParseError::Io {
                path: path.clone(),
                source,
            })?;

        let reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(Trim::All)
            .buffer_capacity(buffer_capacity)
            .from_reader(file);

        let mut stream = Self {
            reader,
            headers: headers.unwrap_or_default(),
            path,
            start_offset,
            record: StringRecord::new(),
        };

        if start_offset == 0 && stream.headers.is_empty() {
            if !stream.advance()? {
                return Err(ParseError::MissingHeader { path: stream.path });
            }
            stream.headers = stream.record.iter().map(|h| h.to_string()).collect();
        }

        Ok(stream)
    }

    /// Read the header row of a file. Used on resume, where the main stream
    /// opens past offset 0 but column names are still those of line one.
    pub fn read_headers(path: impl AsRef<Path>, buffer_capacity: usize) -> Result<Vec<String>, ParseError> {
        let stream = Self::open(path, 0, buffer_capacity, None)?;
        Ok(stream.headers)
    }

    /// Column names for this stream.
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Absolute byte offset consumed so far (start offset + bytes read in
    /// this run).
    pub fn offset(&self) -> u64 {
        self.start_offset + self.reader.position().byte()
    }

    fn advance(&mut self) -> Result<bool, ParseError> {
        self.reader
            .read_record(&mut self.record)
            .map_err(|source| ParseError::Csv {
                path: self.path.clone(),
                source,
            })
    }

    /// Emit the next row, or `None` at end of stream.
    ///
    /// Rows with fewer cells than the header are padded with empty strings;
    /// extra cells are dropped. Fully empty lines never reach the caller
    /// (the CSV reader skips them).
    pub fn next_row(&mut self) -> Result<Option<ParsedRow>, ParseError> {
        if !self.advance()? {
            return Ok(None);
        }

        let mut fields = HashMap::with_capacity(self.headers.len());
        for (i, name) in self.headers.iter().enumerate() {
            let value = self.record.get(i).unwrap_or("");
            fields.insert(name.clone(), value.to_string());
        }

        Ok(Some(ParsedRow {
            fields,
            offset: self.offset(),
        }))
    }
}

/// Message emitted by the reader thread.
#[derive(Debug)]
pub enum StreamItem {
    Row(ParsedRow),
    /// End of stream, carrying the final absolute offset. Blank trailing
    /// lines and the header of an otherwise empty file are consumed bytes
    /// too, so the cursor reaches the true end of the file.
    Eof { offset: u64 },
}

/// Move the stream onto its own thread, yielding rows through a bounded
/// channel. The thread stops after reporting end of file, on the first
/// error, or as soon as the receiver is dropped; the file handle is
/// released with it.
pub fn spawn_reader(mut stream: CsvStream) -> mpsc::Receiver<Result<StreamItem, ParseError>> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    std::thread::Builder::new()
        .name("csv-reader".to_string())
        .spawn(move || loop {
            match stream.next_row() {
                Ok(Some(row)) => {
                    if tx.blocking_send(Ok(StreamItem::Row(row))).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    let _ = tx.blocking_send(Ok(StreamItem::Eof {
                        offset: stream.offset(),
                    }));
                    break;
                }
                Err(err) => {
                    let _ = tx.blocking_send(Err(err));
                    break;
                }
            }
        })
        .expect("failed to spawn csv-reader thread");

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const BUF: usize = 64 * 1024;

    fn write_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_header_read_at_offset_zero() {
        let file = write_file("Customer Id,First Name,Email\nC001,Alice,alice@x\n");
        let stream = CsvStream::open(file.path(), 0, BUF, None).unwrap();
        assert_eq!(stream.headers(), &["Customer Id", "First Name", "Email"]);
    }

    #[test]
    fn test_rows_and_offsets_are_monotonic() {
        let content = "id,name\nC001,Alice\nC002,Bob\n";
        let file = write_file(content);
        let mut stream = CsvStream::open(file.path(), 0, BUF, None).unwrap();

        let first = stream.next_row().unwrap().unwrap();
        let second = stream.next_row().unwrap().unwrap();
        assert!(stream.next_row().unwrap().is_none());

        assert_eq!(first.fields["id"], "C001");
        assert_eq!(second.fields["name"], "Bob");
        assert!(first.offset < second.offset);
        assert_eq!(second.offset, content.len() as u64);
    }

    #[test]
    fn test_open_at_offset_with_external_headers() {
        let content = "id,name\nC001,Alice\nC002,Bob\n";
        let file = write_file(content);
        // Start right at the second data row.
        let start = content.find("C002").unwrap() as u64;
        let headers = CsvStream::read_headers(file.path(), BUF).unwrap();
        let mut stream = CsvStream::open(file.path(), start, BUF, Some(headers)).unwrap();

        let row = stream.next_row().unwrap().unwrap();
        assert_eq!(row.fields["id"], "C002");
        assert_eq!(row.offset, content.len() as u64);
        assert!(stream.next_row().unwrap().is_none());
    }

    #[test]
    fn test_short_rows_pad_and_long_rows_drop() {
        let file = write_file("id,name,city\nC001,Alice\nC002,Bob,Oslo,extra\n");
        let mut stream = CsvStream::open(file.path(), 0, BUF, None).unwrap();

        let short = stream.next_row().unwrap().unwrap();
        assert_eq!(short.fields["city"], "");

        let long = stream.next_row().unwrap().unwrap();
        assert_eq!(long.fields.len(), 3);
        assert_eq!(long.fields["city"], "Oslo");
    }

    #[test]
    fn test_empty_lines_are_skipped_and_cells_trimmed() {
        let file = write_file("id,name\n\nC001,  Alice  \n\nC002,Bob\n");
        let mut stream = CsvStream::open(file.path(), 0, BUF, None).unwrap();

        let first = stream.next_row().unwrap().unwrap();
        assert_eq!(first.fields["name"], "Alice");
        let second = stream.next_row().unwrap().unwrap();
        assert_eq!(second.fields["id"], "C002");
        assert!(stream.next_row().unwrap().is_none());
    }

    #[test]
    fn test_quoted_cells_with_embedded_delimiters() {
        let file = write_file("id,about\nC001,\"likes, commas and\n newlines\"\n");
        let mut stream = CsvStream::open(file.path(), 0, BUF, None).unwrap();
        let row = stream.next_row().unwrap().unwrap();
        assert!(row.fields["about"].contains("commas"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = CsvStream::open("/nonexistent/customers.csv", 0, BUF, None);
        assert!(matches!(result, Err(ParseError::Io { .. })));
    }

    #[tokio::test]
    async fn test_spawn_reader_streams_rows_then_eof() {
        let content = "id,name\nC001,Alice\nC002,Bob\n";
        let file = write_file(content);
        let stream = CsvStream::open(file.path(), 0, BUF, None).unwrap();
        let mut rx = spawn_reader(stream);

        let mut ids = Vec::new();
        let mut eof_offset = None;
        while let Some(item) = rx.recv().await {
            match item.unwrap() {
                StreamItem::Row(row) => ids.push(row.fields["id"].clone()),
                StreamItem::Eof { offset } => eof_offset = Some(offset),
            }
        }
        assert_eq!(ids, vec!["C001", "C002"]);
        assert_eq!(eof_offset, Some(content.len() as u64));
    }

    #[tokio::test]
    async fn test_spawn_reader_reports_eof_for_header_only_file() {
        let content = "id,name\n";
        let file = write_file(content);
        let stream = CsvStream::open(file.path(), 0, BUF, None).unwrap();
        let mut rx = spawn_reader(stream);

        match rx.recv().await.unwrap().unwrap() {
            StreamItem::Eof { offset } => assert_eq!(offset, content.len() as u64),
            other => panic!("expected eof, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_spawn_reader_stops_when_receiver_drops() {
        let mut content = String::from("id,name\n");
        for i in 0..10_000 {
            content.push_str(&format!("C{i},Name{i}\n"));
        }
        let file = write_file(&content);
        let stream = CsvStream::open(file.path(), 0, BUF, None).unwrap();
        let mut rx = spawn_reader(stream);

        match rx.recv().await.unwrap().unwrap() {
            StreamItem::Row(first) => assert_eq!(first.fields["id"], "C0"),
            other => panic!("expected row, got {other:?}"),
        }
        drop(rx);
        // The reader thread exits on its next send; nothing to assert beyond
        // not hanging.
    }
}
