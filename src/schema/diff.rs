//! Field-by-field comparison of two inferred schemas.

use super::{SchemaReport, TypeTag};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommonField {
    pub name: String,
    pub source_types: Vec<TypeTag>,
    pub target_types: Vec<TypeTag>,
    pub types_match: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeDifference {
    pub field: String,
    pub source_types: Vec<TypeTag>,
    pub target_types: Vec<TypeTag>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchemaDiffStats {
    pub source_field_count: usize,
    pub target_field_count: usize,
    pub common_field_count: usize,
    pub mismatch_count: usize,
}

/// Differences between a source and a target schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaDiff {
    pub source: String,
    pub target: String,
    pub common_fields: Vec<CommonField>,
    pub source_only_fields: Vec<(String, Vec<TypeTag>)>,
    pub target_only_fields: Vec<(String, Vec<TypeTag>)>,
    pub type_differences: Vec<TypeDifference>,
    pub stats: SchemaDiffStats,
}

fn same_types(a: &[TypeTag], b: &[TypeTag]) -> bool {
    a.iter().collect::<BTreeSet<_>>() == b.iter().collect::<BTreeSet<_>>()
}

/// Compare two schemas. Type sets are compared without regard to order.
pub fn compare_schemas(source: &SchemaReport, target: &SchemaReport) -> SchemaDiff {
    let mut common_fields = Vec::new();
    let mut source_only_fields = Vec::new();
    let mut type_differences = Vec::new();

    for (name, info) in &source.fields {
        match target.fields.get(name) {
            Some(other) => {
                let types_match = same_types(&info.types, &other.types);
                if !types_match {
                    type_differences.push(TypeDifference {
                        field: name.clone(),
                        source_types: info.types.clone(),
                        target_types: other.types.clone(),
                    });
                }
                common_fields.push(CommonField {
                    name: name.clone(),
                    source_types: info.types.clone(),
                    target_types: other.types.clone(),
                    types_match,
                });
            }
            None => source_only_fields.push((name.clone(), info.types.clone())),
        }
    }

    let target_only_fields: Vec<_> = target
        .fields
        .iter()
        .filter(|(name, _)| !source.fields.contains_key(*name))
        .map(|(name, info)| (name.clone(), info.types.clone()))
        .collect();

    let stats = SchemaDiffStats {
        source_field_count: source.fields.len(),
        target_field_count: target.fields.len(),
        common_field_count: common_fields.len(),
        mismatch_count: type_differences.len(),
    };

    SchemaDiff {
        source: source.collection_name.clone(),
        target: target.collection_name.clone(),
        common_fields,
        source_only_fields,
        target_only_fields,
        type_differences,
        stats,
    }
}

fn join(types: &[TypeTag]) -> String {
    types
        .iter()
        .map(TypeTag::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for SchemaDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# Schema Comparison: '{}' vs '{}'\n", self.source, self.target)?;

        writeln!(f, "## Summary")?;
        writeln!(
            f,
            "- Source Collection: {} ({} fields)",
            self.source, self.stats.source_field_count
        )?;
        writeln!(
            f,
            "- Target Collection: {} ({} fields)",
            self.target, self.stats.target_field_count
        )?;
        writeln!(f, "- Common Fields: {}", self.stats.common_field_count)?;
        writeln!(f, "- Fields Only in Source: {}", self.source_only_fields.len())?;
        writeln!(f, "- Fields Only in Target: {}", self.target_only_fields.len())?;
        writeln!(f, "- Type Mismatches: {}\n", self.type_differences.len())?;

        if !self.type_differences.is_empty() {
            writeln!(f, "## Type Differences")?;
            for diff in &self.type_differences {
                writeln!(
                    f,
                    "- {}: {} ({}) vs {} ({})",
                    diff.field,
                    join(&diff.source_types),
                    self.source,
                    join(&diff.target_types),
                    self.target
                )?;
            }
            writeln!(f)?;
        }

        for (heading, fields) in [
            (&self.source, &self.source_only_fields),
            (&self.target, &self.target_only_fields),
        ] {
            if fields.is_empty() {
                continue;
            }
            writeln!(f, "## Fields Only in {}", heading)?;
            for (name, types) in fields {
                writeln!(f, "- {}: {}", name, join(types))?;
            }
            writeln!(f)?;
        }

        if !self.common_fields.is_empty() {
            writeln!(f, "## Common Fields")?;
            for field in &self.common_fields {
                let mark = if field.types_match { '✓' } else { '✗' };
                writeln!(f, "- {} {}", mark, field.name)?;
            }
        }

        Ok(())
    }
}
