#![allow(clippy::result_large_err)] // Address parsing returns AppError so callers keep the structured validation code.

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub const ROOT_NAME: &str = "__ROOT__";
pub const TERMINATOR_NAME: &str = "__TERMINATE__";

/// `(dataset, collection)` pair identifying one collection in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CollectionAddress {
    pub dataset: String,
    pub collection: String,
}

impl CollectionAddress {
    pub fn new(dataset: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            collection: collection.into(),
        }
    }

    /// Artificial start node that carries the identity seed.
    pub fn root() -> Self {
        Self::new(ROOT_NAME, ROOT_NAME)
    }

    /// Artificial end node every terminal collection feeds into.
    pub fn terminator() -> Self {
        Self::new(TERMINATOR_NAME, TERMINATOR_NAME)
    }

    pub fn is_root(&self) -> bool {
        self.dataset == ROOT_NAME && self.collection == ROOT_NAME
    }

    pub fn is_terminator(&self) -> bool {
        self.dataset == TERMINATOR_NAME && self.collection == TERMINATOR_NAME
    }

    pub fn is_artificial(&self) -> bool {
        self.is_root() || self.is_terminator()
    }

    pub fn field(&self, path: FieldPath) -> FieldAddress {
        FieldAddress::new(self.clone(), path)
    }

    pub fn value(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CollectionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_artificial() {
            write!(f, "{}:{}", self.dataset, self.collection)
        } else {
            write!(f, "{}.{}", self.dataset, self.collection)
        }
    }
}

impl FromStr for CollectionAddress {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if let Some((dataset, collection)) = value.split_once(':') {
            let address = CollectionAddress::new(dataset, collection);
            if address.is_artificial() {
                return Ok(address);
            }
        }
        match value.split_once('.') {
            Some((dataset, collection)) if !dataset.is_empty() && !collection.is_empty() => {
                Ok(CollectionAddress::new(dataset, collection))
            }
            _ => Err(AppError::new(
                ErrorCategory::ValidationError,
                format!(
                    "'{}' is not a collection address; expected <dataset>.<collection>",
                    value
                ),
            )
            .with_code("DSR-ADDR-001")),
        }
    }
}

impl TryFrom<String> for CollectionAddress {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CollectionAddress> for String {
    fn from(address: CollectionAddress) -> Self {
        address.to_string()
    }
}

/// Dotted path into a (possibly nested) record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldPath(segments.into_iter().map(Into::into).collect())
    }

    pub fn parse(value: &str) -> Self {
        FieldPath::new(value.split('.').filter(|segment| !segment.is_empty()))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn string_path(&self) -> String {
        self.0.join(".")
    }

    pub fn child(&self, segment: impl Into<String>) -> FieldPath {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        FieldPath(segments)
    }

    /// Collect every non-null value at this path, descending through arrays.
    pub fn retrieve_values(&self, row: &Value) -> Vec<Value> {
        let mut out = Vec::new();
        collect_at(row, &self.0, &mut out);
        out
    }
}

fn collect_at(value: &Value, segments: &[String], out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_at(item, segments, out);
            }
        }
        Value::Null => {}
        _ if segments.is_empty() => out.push(value.clone()),
        Value::Object(map) => {
            if let Some(child) = map.get(&segments[0]) {
                collect_at(child, &segments[1..], out);
            }
        }
        _ => {}
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.string_path())
    }
}

impl TryFrom<String> for FieldPath {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ok(FieldPath::parse(&value))
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.string_path()
    }
}

/// One (possibly nested) field of one collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldAddress {
    pub collection: CollectionAddress,
    pub path: FieldPath,
}

impl FieldAddress {
    pub fn new(collection: CollectionAddress, path: FieldPath) -> Self {
        Self { collection, path }
    }

    pub fn collection_address(&self) -> &CollectionAddress {
        &self.collection
    }
}

impl fmt::Display for FieldAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.collection, self.path)
    }
}

impl FromStr for FieldAddress {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            AppError::new(
                ErrorCategory::ValidationError,
                format!(
                    "'{}' is not a field address; expected <dataset>.<collection>.<field>",
                    value
                ),
            )
            .with_code("DSR-ADDR-002")
        };
        if let Some((head, rest)) = value.split_once('.') {
            if let Some((dataset, collection)) = head.split_once(':') {
                let address = CollectionAddress::new(dataset, collection);
                if address.is_artificial() && !rest.is_empty() {
                    return Ok(FieldAddress::new(address, FieldPath::parse(rest)));
                }
            }
        }
        let mut parts = value.splitn(3, '.');
        let dataset = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let collection = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let path = FieldPath::parse(parts.next().ok_or_else(invalid)?);
        if path.is_empty() {
            return Err(invalid());
        }
        Ok(FieldAddress::new(
            CollectionAddress::new(dataset, collection),
            path,
        ))
    }
}

impl TryFrom<String> for FieldAddress {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FieldAddress> for String {
    fn from(address: FieldAddress) -> Self {
        address.to_string()
    }
}
