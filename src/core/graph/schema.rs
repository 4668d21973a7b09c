#![allow(clippy::result_large_err)] // Dataset schema APIs return AppError to preserve structured validation context without boxing.

use crate::core::error::AppError;
use crate::core::graph::config::{Collection, Dataset, Field};
use crate::core::types::ErrorCategory;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Root document of a dataset definition file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatasetDocument {
    pub datasets: Vec<Dataset>,
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_\-]+$").expect("static regex"))
}

impl DatasetDocument {
    /// Load and validate a dataset document from a YAML file.
    pub fn load_from_file(path: &Path) -> Result<Self, AppError> {
        let text = fs::read_to_string(path).map_err(|err| {
            AppError::new(
                ErrorCategory::IoError,
                format!("failed to read {}: {}", path.display(), err),
            )
        })?;
        let doc: DatasetDocument = serde_yaml::from_str(&text).map_err(|err| {
            AppError::new(
                ErrorCategory::ValidationError,
                format!("failed to parse {}: {}", path.display(), err),
            )
            .with_code("DSR-SCHEMA-001")
        })?;
        doc.validate()?;
        Ok(doc)
    }

    /// Check names are usable inside dotted addresses.
    pub fn validate(&self) -> Result<(), AppError> {
        for dataset in &self.datasets {
            check_name("dataset", &dataset.name)?;
            if dataset.connection_key.trim().is_empty() {
                return Err(AppError::new(
                    ErrorCategory::ValidationError,
                    format!("dataset {} has empty connection_key", dataset.name),
                )
                .with_code("DSR-SCHEMA-003"));
            }
            for collection in &dataset.collections {
                check_name("collection", &collection.name)?;
                check_fields(&collection.fields)?;
            }
        }
        Ok(())
    }
}

fn check_fields(fields: &[Field]) -> Result<(), AppError> {
    for field in fields {
        check_name("field", &field.name)?;
        check_fields(&field.fields)?;
    }
    Ok(())
}

fn check_name(kind: &str, name: &str) -> Result<(), AppError> {
    if !name_pattern().is_match(name) {
        return Err(AppError::new(
            ErrorCategory::ValidationError,
            format!(
                "{} name '{}' may only contain letters, digits, '_' and '-'",
                kind, name
            ),
        )
        .with_code("DSR-SCHEMA-002"));
    }
    Ok(())
}

/// Load datasets from a YAML file or from every `.yml`/`.yaml` file in a directory.
pub fn load_datasets(path: &Path) -> Result<Vec<Dataset>, AppError> {
    if !path.is_dir() {
        return Ok(DatasetDocument::load_from_file(path)?.datasets);
    }
    let entries = fs::read_dir(path).map_err(|err| {
        AppError::new(
            ErrorCategory::IoError,
            format!("failed to list {}: {}", path.display(), err),
        )
    })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext == "yml" || ext == "yaml")
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    let mut datasets = Vec::new();
    for file in files {
        datasets.extend(DatasetDocument::load_from_file(&file)?.datasets);
    }
    Ok(datasets)
}

/// SHA-256 fingerprint of dataset definitions, used to detect config drift on resume.
pub fn dataset_hash(datasets: &[Dataset]) -> Result<String, AppError> {
    let bytes = serde_json::to_vec(datasets)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Collections of every dataset, for callers that only need names.
pub fn collection_names(datasets: &[Dataset]) -> Vec<String> {
    datasets
        .iter()
        .flat_map(|d| d.collections.iter().map(move |c: &Collection| format!("{}.{}", d.name, c.name)))
        .collect()
}
