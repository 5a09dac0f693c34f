//! # CSV Codec
//!
//! Reads input datasets into validated [`Record`]s and writes enriched chunks
//! back out. Output columns are the sorted union of every record's field
//! names, so chunks with differently shaped rows still share one header.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::constants::TICKER_FIELD;
use crate::models::{Record, RecordError};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("dataset header has no '{column}' column")]
    MissingColumn { column: String },

    #[error("CSV error at row {row}: {message}")]
    Csv { row: usize, message: String },

    #[error("dataset is not valid UTF-8: {0}")]
    Encoding(String),

    #[error("invalid record at row {row}: {source}")]
    Record {
        row: usize,
        #[source]
        source: RecordError,
    },
}

impl CodecError {
    fn csv(row: usize, err: csv::Error) -> Self {
        Self::Csv {
            row,
            message: err.to_string(),
        }
    }
}

/// Parse a CSV dataset with a header row.
pub fn decode_records(bytes: &[u8]) -> Result<Vec<Record>, CodecError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(bytes);

    let headers = reader.headers().map_err(|e| CodecError::csv(0, e))?.clone();
    if !headers.iter().any(|h| h == TICKER_FIELD) {
        return Err(CodecError::MissingColumn {
            column: TICKER_FIELD.to_string(),
        });
    }

    let mut records = Vec::new();
    for (index, row) in reader.records().enumerate() {
        let row_number = index + 1;
        let row = row.map_err(|e| CodecError::csv(row_number, e))?;
        let record = Record::from_pairs(headers.iter().zip(row.iter()))
            .map_err(|source| CodecError::Record {
                row: row_number,
                source,
            })?;
        records.push(record);
    }

    Ok(records)
}

/// Sorted union of the field names used by `records`.
pub fn header_for(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .flat_map(|record| record.field_names())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Write records as CSV. An empty slice encodes to an empty string.
pub fn encode_records(records: &[Record]) -> Result<String, CodecError> {
    if records.is_empty() {
        return Ok(String::new());
    }

    let header = header_for(records);
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(&header)
        .map_err(|e| CodecError::csv(0, e))?;

    for (index, record) in records.iter().enumerate() {
        let row = header
            .iter()
            .map(|column| record.get(column).unwrap_or_default());
        writer
            .write_record(row)
            .map_err(|e| CodecError::csv(index + 1, e))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| CodecError::Encoding(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| CodecError::Encoding(e.to_string()))
}
