//! `$jsonSchema` validator synthesis from an inferred schema.

use super::report::coverage;
use super::{SchemaReport, TypeTag};
use crate::error::ServerError;
use mongodb::bson::{doc, Bson, Document};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// How eagerly fields are marked as required.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    Strict,
    #[default]
    Moderate,
    Relaxed,
}

impl Strictness {
    /// Minimum coverage (percent) for a field to become required.
    pub fn required_threshold(&self) -> u32 {
        match self {
            Self::Strict => 90,
            Self::Moderate => 75,
            Self::Relaxed => 60,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Moderate => "moderate",
            Self::Relaxed => "relaxed",
        }
    }
}

impl fmt::Display for Strictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strictness {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "moderate" => Ok(Self::Moderate),
            "relaxed" => Ok(Self::Relaxed),
            other => Err(ServerError::invalid_input(format!(
                "Unknown strictness '{}', expected strict, moderate or relaxed",
                other
            ))),
        }
    }
}

fn bson_types(tag: TypeTag) -> &'static [&'static str] {
    match tag {
        TypeTag::String => &["string"],
        TypeTag::Number => &["number", "double", "int"],
        TypeTag::Boolean => &["bool"],
        TypeTag::Array => &["array"],
        TypeTag::Object => &["object"],
        TypeTag::Null => &["null"],
        TypeTag::Date => &["date"],
        TypeTag::ObjectId => &["objectId"],
        TypeTag::Undefined => &[],
    }
}

/// A top-level field with its `name` and `name[]` entries folded together.
#[derive(Default)]
struct MergedField {
    types: BTreeSet<TypeTag>,
    count: usize,
    object_items: bool,
}

/// Build a `$jsonSchema` validator covering the top-level fields of `report`.
///
/// A field is required when its coverage reaches the strictness threshold
/// and it was never seen as `null`. Strict validators reject unknown fields.
/// A field holding arrays of subdocuments gets an `items` schema of type
/// `object`.
pub fn generate_validator(report: &SchemaReport, strictness: Strictness) -> Document {
    let threshold = strictness.required_threshold();

    let mut merged: BTreeMap<&str, MergedField> = BTreeMap::new();
    for (path, info) in report.top_level_fields() {
        let (name, object_items) = match path.strip_suffix("[]") {
            Some(name) => (name, true),
            None => (path.as_str(), false),
        };
        let field = merged.entry(name).or_default();
        field.types.extend(info.types.iter().copied());
        // A document holds one value per key, so the counts never overlap.
        field.count += info.count;
        field.object_items |= object_items;
    }

    let mut properties = Document::new();
    let mut required: Vec<Bson> = Vec::new();

    for (name, field) in merged {
        let types: Vec<&str> = field
            .types
            .iter()
            .flat_map(|tag| bson_types(*tag).iter().copied())
            .collect();
        let mut property = match types.as_slice() {
            [] => Document::new(),
            [single] => doc! { "bsonType": *single },
            many => doc! { "bsonType": many.to_vec() },
        };
        if field.object_items {
            property.insert("items", doc! { "bsonType": "object" });
        }
        properties.insert(name, property);

        if coverage(field.count, report.sample_size) >= threshold
            && !field.types.contains(&TypeTag::Null)
        {
            required.push(Bson::String(name.to_string()));
        }
    }

    let mut schema = doc! {
        "bsonType": "object",
        "required": required,
        "properties": properties,
    };
    if strictness == Strictness::Strict {
        schema.insert("additionalProperties", false);
    }

    doc! { "$jsonSchema": schema }
}
