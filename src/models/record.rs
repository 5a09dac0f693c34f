//! # Market Record
//!
//! An ordered string-to-string row that always carries a `Ticker` column.
//! Field order is preserved through deserialization so that enriched output
//! keeps the original columns first, followed by whatever enrichment adds.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::constants::TICKER_FIELD;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("record is missing the required 'Ticker' field")]
    MissingTicker,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    fields: Vec<(String, String)>,
}

impl Record {
    /// Build a record from ordered `(name, value)` pairs.
    ///
    /// A repeated name keeps its first position and takes the last value.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, RecordError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut record = Self::default();
        for (name, value) in pairs {
            record.set(name, value);
        }
        record.validate()?;
        Ok(record)
    }

    /// Shorthand for a record holding only a ticker.
    pub fn with_ticker(ticker: impl Into<String>) -> Self {
        Self {
            fields: vec![(TICKER_FIELD.to_string(), ticker.into())],
        }
    }

    fn validate(&self) -> Result<(), RecordError> {
        if self.get(TICKER_FIELD).is_none() {
            return Err(RecordError::MissingTicker);
        }
        Ok(())
    }

    /// The ticker symbol, or `None` when the column is blank.
    pub fn ticker(&self) -> Option<&str> {
        self.get(TICKER_FIELD)
            .map(str::trim)
            .filter(|ticker| !ticker.is_empty())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }

    /// Insert a field, replacing the value in place when the name exists.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(field, _)| *field == name) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|(field, _)| field == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

struct RecordVisitor;

impl<'de> Visitor<'de> for RecordVisitor {
    type Value = Record;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a map of string fields containing a Ticker")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut record = Record {
            fields: Vec::with_capacity(access.size_hint().unwrap_or(0)),
        };
        while let Some((name, value)) = access.next_entry::<String, Option<String>>()? {
            record.set(name, value.unwrap_or_default());
        }
        record.validate().map_err(serde::de::Error::custom)?;
        Ok(record)
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(RecordVisitor)
    }
}
