//! Declarative description of datasets, collections and fields.

use crate::core::graph::address::{CollectionAddress, FieldAddress, FieldPath};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::collections::BTreeSet;

/// Scalar type used to cast incoming filter values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    String,
    Integer,
    Float,
    Boolean,
    Object,
    NoOp,
}

impl DataType {
    /// Cast a value to this type; `None` when the value cannot be represented.
    pub fn cast(&self, value: &Value) -> Option<Value> {
        if value.is_null() {
            return None;
        }
        match self {
            DataType::NoOp => Some(value.clone()),
            DataType::String => match value {
                Value::String(s) => Some(Value::String(s.clone())),
                Value::Number(n) => Some(Value::String(n.to_string())),
                Value::Bool(b) => Some(Value::String(b.to_string())),
                _ => None,
            },
            DataType::Integer => match value {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().and_then(whole_f64_to_i64))
                    .map(|i| Value::Number(Number::from(i))),
                Value::String(s) => s.trim().parse::<i64>().ok().map(|i| Value::Number(i.into())),
                Value::Bool(b) => Some(Value::Number(Number::from(*b as i64))),
                _ => None,
            },
            DataType::Float => {
                let parsed = match value {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                };
                parsed.and_then(Number::from_f64).map(Value::Number)
            }
            DataType::Boolean => match value {
                Value::Bool(b) => Some(Value::Bool(*b)),
                Value::String(s) => match s.trim().to_lowercase().as_str() {
                    "true" | "t" | "yes" | "1" => Some(Value::Bool(true)),
                    "false" | "f" | "no" | "0" => Some(Value::Bool(false)),
                    _ => None,
                },
                Value::Number(n) => match n.as_i64() {
                    Some(0) => Some(Value::Bool(false)),
                    Some(1) => Some(Value::Bool(true)),
                    _ => None,
                },
                _ => None,
            },
            DataType::Object => match value {
                Value::Object(_) => Some(value.clone()),
                _ => None,
            },
        }
    }
}

/// `f` as an i64 when it is a whole number inside the i64 range.
fn whole_f64_to_i64(f: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive.
    let in_range = f >= i64::MIN as f64 && f < i64::MAX as f64;
    (f.fract() == 0.0 && in_range).then_some(f as i64)
}

/// Which way values flow along a field reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeDirection {
    /// Values flow from the referenced field into this one.
    From,
    /// Values flow from this field into the referenced one.
    To,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldReference {
    pub field: FieldAddress,
    #[serde(default)]
    pub direction: Option<EdgeDirection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(default)]
    pub data_type: Option<DataType>,
    #[serde(default)]
    pub data_categories: Vec<String>,
    /// Identity seed key (e.g. `email`) this field may be queried by.
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub references: Vec<FieldReference>,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub fields: Vec<Field>,
}

impl Field {
    pub fn new(name: impl Into<String>) -> Self {
        Field {
            name: name.into(),
            data_type: None,
            data_categories: Vec::new(),
            identity: None,
            references: Vec::new(),
            primary_key: false,
            fields: Vec::new(),
        }
    }

    pub fn with_type(mut self, data_type: DataType) -> Self {
        self.data_type = Some(data_type);
        self
    }

    pub fn with_identity(mut self, seed_key: impl Into<String>) -> Self {
        self.identity = Some(seed_key.into());
        self
    }

    pub fn with_reference(mut self, field: FieldAddress, direction: Option<EdgeDirection>) -> Self {
        self.references.push(FieldReference { field, direction });
        self
    }

    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.data_categories = categories.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_fields(mut self, fields: Vec<Field>) -> Self {
        self.fields = fields;
        self
    }

    pub fn cast(&self, value: &Value) -> Option<Value> {
        self.data_type.unwrap_or(DataType::NoOp).cast(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<Field>,
    /// Collections that must finish before this one runs.
    #[serde(default)]
    pub after: BTreeSet<CollectionAddress>,
    #[serde(default)]
    pub skip_processing: bool,
}

impl Collection {
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Collection {
            name: name.into(),
            fields,
            after: BTreeSet::new(),
            skip_processing: false,
        }
    }

    pub fn with_after<I>(mut self, after: I) -> Self
    where
        I: IntoIterator<Item = CollectionAddress>,
    {
        self.after = after.into_iter().collect();
        self
    }

    pub fn empty(name: impl Into<String>) -> Self {
        Collection::new(name, Vec::new())
    }

    /// Look up a (possibly nested) field by path.
    pub fn field(&self, path: &FieldPath) -> Option<&Field> {
        let mut segments = path.segments().iter();
        let first = segments.next()?;
        let mut current = self.fields.iter().find(|f| &f.name == first)?;
        for segment in segments {
            current = current.fields.iter().find(|f| &f.name == segment)?;
        }
        Some(current)
    }

    /// Every field path in declaration order, nested fields included.
    pub fn field_paths(&self) -> Vec<(FieldPath, &Field)> {
        let mut out = Vec::new();
        for field in &self.fields {
            walk_fields(FieldPath::new([field.name.clone()]), field, &mut out);
        }
        out
    }

    /// First repeated field name found at any nesting level.
    pub fn duplicate_field_name(&self) -> Option<String> {
        duplicate_in(&self.fields, &FieldPath::default())
    }
}

fn walk_fields<'a>(path: FieldPath, field: &'a Field, out: &mut Vec<(FieldPath, &'a Field)>) {
    for child in &field.fields {
        walk_fields(path.child(child.name.clone()), child, out);
    }
    out.push((path, field));
}

fn duplicate_in(fields: &[Field], prefix: &FieldPath) -> Option<String> {
    let mut seen = BTreeSet::new();
    for field in fields {
        let path = prefix.child(field.name.clone());
        if !seen.insert(field.name.as_str()) {
            return Some(path.string_path());
        }
        if let Some(dup) = duplicate_in(&field.fields, &path) {
            return Some(dup);
        }
    }
    None
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    /// Key of the connector responsible for this dataset's collections.
    pub connection_key: String,
    #[serde(default)]
    pub collections: Vec<Collection>,
    /// Datasets whose collections must all finish before any collection here runs.
    #[serde(default)]
    pub after: BTreeSet<String>,
}

impl Dataset {
    pub fn new(
        name: impl Into<String>,
        connection_key: impl Into<String>,
        collections: Vec<Collection>,
    ) -> Self {
        Dataset {
            name: name.into(),
            connection_key: connection_key.into(),
            collections,
            after: BTreeSet::new(),
        }
    }

    pub fn with_after<I, S>(mut self, after: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.after = after.into_iter().map(Into::into).collect();
        self
    }
}

/// A collection together with the dataset-level settings it inherits.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub address: CollectionAddress,
    pub connection_key: String,
    pub collection: Collection,
    pub dataset_after: BTreeSet<String>,
}

impl Node {
    pub fn new(dataset: &Dataset, collection: Collection) -> Self {
        Node {
            address: CollectionAddress::new(dataset.name.clone(), collection.name.clone()),
            connection_key: dataset.connection_key.clone(),
            collection,
            dataset_after: dataset.after.clone(),
        }
    }

    /// Placeholder node for ROOT / TERMINATOR.
    pub fn artificial(address: CollectionAddress) -> Self {
        Node {
            collection: Collection::empty(address.collection.clone()),
            address,
            connection_key: String::new(),
            dataset_after: BTreeSet::new(),
        }
    }
}
