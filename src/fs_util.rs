use std::fs;
use std::io::{BufRead, BufReader, Read};

use camino::Utf8Path;
use csv::{ReaderBuilder, StringRecord, Trim};
use flate2::read::MultiGzDecoder;

use crate::error::OrthoError;

/// One non-blank, non-comment record of a delimited text table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub line: usize,
    pub fields: Vec<String>,
}

impl Record {
    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields
            .get(index)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn require(&self, index: usize, path: &Utf8Path) -> Result<&str, OrthoError> {
        self.field(index).ok_or_else(|| OrthoError::TableParse {
            path: path.to_string(),
            line: self.line,
            message: format!("missing column {}", index + 1),
        })
    }

    fn from_csv(record: &StringRecord) -> Self {
        Self {
            line: record.position().map_or(0, |position| position.line() as usize),
            fields: record.iter().map(str::to_string).collect(),
        }
    }
}

pub fn open_text(path: &Utf8Path) -> Result<Box<dyn BufRead>, OrthoError> {
    let file = fs::File::open(path.as_std_path())
        .map_err(|err| OrthoError::Filesystem(format!("open {path}: {err}")))?;
    if path.extension() == Some("gz") {
        return Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))));
    }
    Ok(Box::new(BufReader::new(file)))
}

/// Reads a tab- or comma-delimited table, plain or gzipped.
pub fn read_records(path: &Utf8Path, has_header: bool) -> Result<Vec<Record>, OrthoError> {
    let mut text = String::new();
    open_text(path)?
        .read_to_string(&mut text)
        .map_err(|err| OrthoError::Filesystem(format!("read {path}: {err}")))?;
    parse_records(&text, has_header).map_err(|err| match err.position() {
        Some(position) => OrthoError::TableParse {
            path: path.to_string(),
            line: position.line() as usize,
            message: err.to_string(),
        },
        None => OrthoError::Filesystem(format!("read {path}: {err}")),
    })
}

/// The delimiter is fixed per file: tab when the first data line has one,
/// comma otherwise. Quoted fields follow RFC 4180.
pub fn parse_records(text: &str, has_header: bool) -> Result<Vec<Record>, csv::Error> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .trim(Trim::All)
        .delimiter(detect_delimiter(text))
        .from_reader(text.as_bytes());

    let mut records = Vec::new();
    let mut header_pending = has_header;
    for result in reader.records() {
        let record = result?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        if header_pending {
            header_pending = false;
            continue;
        }
        records.push(Record::from_csv(&record));
    }
    Ok(records)
}

fn detect_delimiter(text: &str) -> u8 {
    let first = text
        .lines()
        .find(|line| !line.trim().is_empty() && !line.starts_with('#'));
    match first {
        Some(line) if line.contains('\t') => b'\t',
        _ => b',',
    }
}
