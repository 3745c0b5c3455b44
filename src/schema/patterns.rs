//! Query-pattern analysis: index recommendations, unused indexes and schema
//! concerns for one collection.

use super::{SchemaReport, TypeTag};
use crate::database::{IndexInfo, IndexList};
use chrono::{DateTime, Utc};
use mongodb::bson::{Bson, Document};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Profiled queries slower than this get an index recommendation.
const SLOW_QUERY_MILLIS: i64 = 10;

/// Arrays longer than this are reported as a schema concern.
const LARGE_ARRAY_LEN: usize = 50;

/// Name fragments of fields that tend to be queried.
const QUERY_NAME_FRAGMENTS: [&str; 4] = ["id", "key", "date", "time"];
const QUERY_NAMES: [&str; 3] = ["email", "name", "status"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexRecommendation {
    pub fields: Vec<String>,
    /// The profiled filter that prompted it, if any
    pub filter: Option<String>,
    pub millis: Option<i64>,
    /// Derived from field names rather than observed queries
    pub automatic: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnusedIndex {
    pub name: String,
    pub fields: Vec<String>,
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaIssue {
    pub field: String,
    pub issue: String,
    pub description: String,
}

/// One profiled query against the collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryStat {
    pub filter: String,
    pub fields: Vec<String>,
    pub millis: i64,
    pub scan_type: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl QueryStat {
    /// Read a `system.profile` entry; entries without a filter are skipped.
    pub fn from_profile(entry: &Document) -> Option<Self> {
        let filter = entry.get_document("command").ok()?.get_document("filter").ok()?;
        let millis = match entry.get("millis") {
            Some(Bson::Int32(v)) => i64::from(*v),
            Some(Bson::Int64(v)) => *v,
            Some(Bson::Double(v)) => *v as i64,
            _ => 0,
        };
        Some(Self {
            filter: Bson::Document(filter.clone())
                .into_relaxed_extjson()
                .to_string(),
            fields: filter.keys().cloned().collect(),
            millis,
            scan_type: entry
                .get_str("planSummary")
                .unwrap_or("Unknown")
                .to_string(),
            timestamp: entry
                .get_datetime("ts")
                .ok()
                .and_then(|ts| DateTime::from_timestamp_millis(ts.timestamp_millis())),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryAnalysis {
    pub collection: String,
    pub index_recommendations: Vec<IndexRecommendation>,
    pub unused_indexes: Vec<UnusedIndex>,
    pub schema_issues: Vec<SchemaIssue>,
    pub query_stats: Vec<QueryStat>,
}

fn looks_queried(field: &str) -> bool {
    let lower = field.to_lowercase();
    QUERY_NAME_FRAGMENTS.iter().any(|f| lower.contains(f)) || QUERY_NAMES.contains(&lower.as_str())
}

fn leads_an_index(field: &str, indexes: &[IndexInfo]) -> bool {
    indexes
        .iter()
        .any(|idx| idx.key.keys().next().map(String::as_str) == Some(field))
}

/// Analyze how `collection` is queried.
///
/// `profile` holds `system.profile` entries for the collection. Unused
/// indexes are only reported when usage statistics were available.
pub fn analyze_query_patterns(
    collection: &str,
    report: &SchemaReport,
    indexes: &IndexList,
    profile: &[Document],
) -> QueryAnalysis {
    let unused_indexes = if indexes.usage_available {
        indexes
            .indexes
            .iter()
            .filter(|idx| idx.name != "_id_")
            .filter(|idx| idx.usage.as_ref().map_or(true, |u| u.ops == 0))
            .map(|idx| UnusedIndex {
                name: idx.name.clone(),
                fields: idx.fields().into_iter().map(String::from).collect(),
                unique: idx.unique,
            })
            .collect()
    } else {
        Vec::new()
    };

    let query_stats: Vec<QueryStat> = profile.iter().filter_map(QueryStat::from_profile).collect();

    let mut index_recommendations: Vec<IndexRecommendation> = query_stats
        .iter()
        .filter(|stat| !stat.fields.is_empty() && stat.millis > SLOW_QUERY_MILLIS)
        .filter(|stat| !indexes.indexes.iter().any(|idx| idx.covers(&stat.fields)))
        .map(|stat| IndexRecommendation {
            fields: stat.fields.clone(),
            filter: Some(stat.filter.clone()),
            millis: Some(stat.millis),
            automatic: false,
        })
        .collect();

    let schema_issues = report
        .fields
        .iter()
        .filter(|(_, info)| info.has_type(TypeTag::Array))
        .filter_map(|(field, info)| match &info.sample {
            Some(Bson::Array(items)) if items.len() > LARGE_ARRAY_LEN => Some(SchemaIssue {
                field: field.clone(),
                issue: "Large array".to_string(),
                description: format!(
                    "Field contains arrays with {}+ items, which can cause performance issues.",
                    items.len()
                ),
            }),
            _ => None,
        })
        .collect();

    let likely_fields: Vec<String> = report
        .fields
        .keys()
        .filter(|field| field.as_str() != "_id")
        .filter(|field| looks_queried(field) && !leads_an_index(field, &indexes.indexes))
        .cloned()
        .collect();
    if !likely_fields.is_empty() {
        index_recommendations.push(IndexRecommendation {
            fields: likely_fields,
            filter: None,
            millis: None,
            automatic: true,
        });
    }

    QueryAnalysis {
        collection: collection.to_string(),
        index_recommendations,
        unused_indexes,
        schema_issues,
        query_stats,
    }
}

impl fmt::Display for QueryAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# Query Pattern Analysis for '{}'\n", self.collection)?;

        if !self.index_recommendations.is_empty() {
            writeln!(f, "## Index Recommendations")?;
            for (i, rec) in self.index_recommendations.iter().enumerate() {
                writeln!(f, "### {}. Create index on: {}", i + 1, rec.fields.join(", "))?;
                if rec.automatic {
                    writeln!(f, "- Automatic recommendation based on field name patterns")?;
                } else if let Some(filter) = &rec.filter {
                    writeln!(f, "- Based on query filter: {}", filter)?;
                    if let Some(millis) = rec.millis {
                        writeln!(f, "- Current execution time: {}ms", millis)?;
                    }
                }
                writeln!(f)?;
            }
        }

        if !self.unused_indexes.is_empty() {
            writeln!(f, "## Unused Indexes")?;
            writeln!(
                f,
                "The following indexes appear to be unused and could potentially be removed:"
            )?;
            for idx in &self.unused_indexes {
                writeln!(f, "- {} on fields: {}", idx.name, idx.fields.join(", "))?;
            }
            writeln!(f)?;
        }

        if !self.schema_issues.is_empty() {
            writeln!(f, "## Schema Concerns")?;
            for issue in &self.schema_issues {
                writeln!(f, "- {}: {} - {}", issue.field, issue.issue, issue.description)?;
            }
            writeln!(f)?;
        }

        if !self.query_stats.is_empty() {
            writeln!(f, "## Recent Queries")?;
            writeln!(f, "Most recent query patterns observed:")?;

            // filter -> (stat, count, total millis)
            let mut patterns: HashMap<&str, (&QueryStat, usize, i64)> = HashMap::new();
            for stat in &self.query_stats {
                let entry = patterns.entry(stat.filter.as_str()).or_insert((stat, 0, 0));
                entry.1 += 1;
                entry.2 += stat.millis;
            }

            let mut patterns: Vec<_> = patterns
                .into_values()
                .map(|(stat, count, total)| (stat, count, total as f64 / count as f64))
                .collect();
            patterns.sort_by(|a, b| b.2.total_cmp(&a.2).then_with(|| a.0.filter.cmp(&b.0.filter)));

            for (stat, count, avg) in patterns.into_iter().take(5) {
                writeln!(f, "- Filter: {}", stat.filter)?;
                writeln!(f, "  - Fields: {}", stat.fields.join(", "))?;
                writeln!(f, "  - Count: {}", count)?;
                writeln!(f, "  - Avg Time: {:.2}ms", avg)?;
                writeln!(f, "  - Scan Type: {}\n", stat.scan_type)?;
            }
        }

        Ok(())
    }
}
