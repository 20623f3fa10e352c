//! Field projection: select and rename columns per the projection config.
//!
//! Output column order follows `selected_fields`. Source columns that are
//! neither mapped nor selected are dropped. A record that cannot supply a
//! selected, non-optional field is rejected and counted.
//!
//! Projecting an already-projected dataset is a no-op: a canonical name
//! present on the record satisfies the field when its mapped source is
//! absent.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dataset::SchemaDescriptor;
use crate::types::Record;

/// The field-projection config document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectionConfig {
    /// Canonical output columns, in output order.
    #[serde(default)]
    pub selected_fields: Vec<String>,
    /// Source column name to canonical column name.
    #[serde(default)]
    pub field_mappings: BTreeMap<String, String>,
    /// Selected fields that may be absent; emitted as `null` when missing.
    #[serde(default)]
    pub optional_fields: Vec<String>,
    /// Source URL for the raw dataset, used when the global config names none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_url: Option<String>,
}

/// Why a record was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub missing_fields: Vec<String>,
}

/// Result of projecting a batch of records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectionOutcome {
    pub records: Vec<Record>,
    pub rejected: usize,
    /// Missing-field counts across rejected records, for logging.
    pub missing_counts: BTreeMap<String, usize>,
}

impl ProjectionOutcome {
    pub fn total(&self) -> usize {
        self.records.len() + self.rejected
    }

    /// Fraction of input records rejected; `0.0` for an empty input.
    pub fn rejection_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.rejected as f64 / total as f64,
        }
    }
}

/// A compiled projection, ready to apply to many records.
pub struct Projector<'a> {
    config: &'a ProjectionConfig,
    /// Canonical name to the source names that map onto it.
    sources: HashMap<&'a str, Vec<&'a str>>,
}

impl<'a> Projector<'a> {
    pub fn new(config: &'a ProjectionConfig) -> Self {
        let mut sources: HashMap<&str, Vec<&str>> = HashMap::new();
        for (source, canonical) in &config.field_mappings {
            sources
                .entry(canonical.as_str())
                .or_default()
                .push(source.as_str());
        }
        Self { config, sources }
    }

    /// Schema of every record this projector emits.
    pub fn schema(&self) -> SchemaDescriptor {
        SchemaDescriptor {
            fields: self.config.selected_fields.clone(),
            field_mappings: self.config.field_mappings.clone(),
        }
    }

    fn is_optional(&self, field: &str) -> bool {
        self.config.optional_fields.iter().any(|f| f == field)
    }

    fn lookup<'r>(&self, record: &'r Record, canonical: &str) -> Option<&'r Value> {
        self.sources
            .get(canonical)
            .and_then(|srcs| srcs.iter().find_map(|s| record.get(*s)))
            .or_else(|| record.get(canonical))
    }

    /// Project one record.
    pub fn project_record(&self, record: &Record) -> Result<Record, Rejection> {
        let mut out = Record::new();
        let mut missing = Vec::new();

        for field in &self.config.selected_fields {
            match self.lookup(record, field) {
                Some(value) => {
                    out.insert(field.clone(), value.clone());
                }
                None if self.is_optional(field) => {
                    out.insert(field.clone(), Value::Null);
                }
                None => missing.push(field.clone()),
            }
        }

        if missing.is_empty() {
            Ok(out)
        } else {
            Err(Rejection {
                missing_fields: missing,
            })
        }
    }

    /// Project every record, counting rejections instead of failing.
    pub fn project_all(&self, records: &[Record]) -> ProjectionOutcome {
        let mut outcome = ProjectionOutcome::default();
        for record in records {
            match self.project_record(record) {
                Ok(projected) => outcome.records.push(projected),
                Err(rejection) => {
                    outcome.rejected += 1;
                    for field in rejection.missing_fields {
                        *outcome.missing_counts.entry(field).or_default() += 1;
                    }
                }
            }
        }
        outcome
    }
}
