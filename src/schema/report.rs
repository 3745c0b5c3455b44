//! Inferred schema reports.

use super::{discover_paths, value_at_path, TypeTag};
use crate::constants::SAMPLE_DISPLAY_LIMIT;
use crate::error::ServerError;
use chrono::{DateTime, Utc};
use mongodb::bson::{Bson, Document};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Statistics for one field path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldInfo {
    /// Distinct tags observed, in stable order
    pub types: Vec<TypeTag>,
    /// Documents in which the path held a defined value
    pub count: usize,
    /// First non-null value seen
    pub sample: Option<Bson>,
    /// `count` as a rounded percentage of the sample
    pub coverage: u32,
}

impl FieldInfo {
    pub fn has_type(&self, tag: TypeTag) -> bool {
        self.types.contains(&tag)
    }
}

/// Result of a schema inference run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaReport {
    pub collection_name: String,
    /// Documents actually sampled; may be below the requested size
    pub sample_size: usize,
    pub fields: BTreeMap<String, FieldInfo>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Default)]
struct FieldAccumulator {
    types: BTreeSet<TypeTag>,
    count: usize,
    sample: Option<Bson>,
}

/// `round(count / total * 100)` with halves rounded up.
pub(crate) fn coverage(count: usize, total: usize) -> u32 {
    ((200 * count + total) / (2 * total)) as u32
}

impl SchemaReport {
    /// Build a report from sampled documents.
    ///
    /// All paths are discovered before any is measured, so a field missing
    /// from the first documents still gets a coverage over the whole sample.
    pub fn from_documents(
        collection_name: &str,
        documents: &[Document],
    ) -> Result<Self, ServerError> {
        if documents.is_empty() {
            return Err(ServerError::EmptyCollection(collection_name.to_string()));
        }

        let mut paths = BTreeSet::new();
        for document in documents {
            discover_paths(document, "", &mut paths);
        }

        let mut accumulators: BTreeMap<String, FieldAccumulator> = paths
            .into_iter()
            .map(|path| (path, FieldAccumulator::default()))
            .collect();

        for document in documents {
            for (path, acc) in accumulators.iter_mut() {
                let value = match value_at_path(document, path) {
                    Some(Bson::Undefined) | None => continue,
                    Some(value) => value,
                };
                if acc.sample.is_none() && !matches!(value, Bson::Null) {
                    acc.sample = Some(value.clone());
                }
                acc.types.insert(TypeTag::of(value));
                acc.count += 1;
            }
        }

        let total = documents.len();
        let fields = accumulators
            .into_iter()
            .map(|(path, acc)| {
                let info = FieldInfo {
                    types: acc.types.into_iter().collect(),
                    count: acc.count,
                    sample: acc.sample,
                    coverage: coverage(acc.count, total),
                };
                (path, info)
            })
            .collect();

        Ok(Self {
            collection_name: collection_name.to_string(),
            sample_size: total,
            fields,
            timestamp: Utc::now(),
        })
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    /// Paths without a `.`, i.e. fields of the document itself.
    pub fn top_level_fields(&self) -> impl Iterator<Item = (&String, &FieldInfo)> {
        self.fields.iter().filter(|(path, _)| !path.contains('.'))
    }
}

/// Short text form of a sample value.
fn display_sample(value: &Bson) -> String {
    let text = match value {
        Bson::String(s) => s.clone(),
        other => other.clone().into_relaxed_extjson().to_string(),
    };

    if text.chars().count() > SAMPLE_DISPLAY_LIMIT {
        let head: String = text.chars().take(SAMPLE_DISPLAY_LIMIT - 3).collect();
        format!("{}…", head)
    } else {
        text
    }
}

impl fmt::Display for SchemaReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Schema for '{}' (sampled {} documents):",
            self.collection_name, self.sample_size
        )?;

        for (path, info) in &self.fields {
            let types: Vec<&str> = info.types.iter().map(TypeTag::as_str).collect();
            write!(f, "- {}: {} ({}% coverage)", path, types.join(" | "), info.coverage)?;
            if let Some(sample) = &info.sample {
                write!(f, " (example: {})", display_sample(sample))?;
            }
            writeln!(f)?;
        }

        Ok(())
    }
}
