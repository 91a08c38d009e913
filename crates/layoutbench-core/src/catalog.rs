//! Query Catalog: a fixed, ordered set of query templates.
//!
//! Templates name the target table through a single `{table}` placeholder and
//! are realized only against a validated [`PhysicalName`].

use crate::errors::ConfigError;
use crate::model::QueryDef;
use crate::naming::{validate_identifier, PhysicalName};
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::OnceLock;

pub const TABLE_PLACEHOLDER: &str = "{table}";

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{[^{}]*\}").expect("static regex"))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryTemplate {
    pub id: String,
    sql: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_rows: Option<u64>,
}

impl QueryTemplate {
    pub fn new(id: &str, sql: &str, max_rows: Option<u64>) -> Result<Self, ConfigError> {
        validate_identifier("query id", id)?;
        if sql.trim().is_empty() {
            return Err(ConfigError(format!("query '{}' has empty sql", id)));
        }

        let mut has_table = false;
        for m in placeholder_re().find_iter(sql) {
            if m.as_str() == TABLE_PLACEHOLDER {
                has_table = true;
            } else {
                return Err(ConfigError(format!(
                    "query '{}': unsupported placeholder {} (only {} is substituted)",
                    id,
                    m.as_str(),
                    TABLE_PLACEHOLDER
                )));
            }
        }
        if !has_table {
            return Err(ConfigError(format!(
                "query '{}' does not reference {}",
                id, TABLE_PLACEHOLDER
            )));
        }

        Ok(Self {
            id: id.to_string(),
            sql: sql.to_string(),
            max_rows,
        })
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// The one substitution point: swap `{table}` for the quoted physical name.
    pub fn realize(&self, table: &PhysicalName) -> String {
        self.sql.replace(TABLE_PLACEHOLDER, &table.quoted())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryCatalog {
    templates: Vec<QueryTemplate>,
}

impl QueryCatalog {
    pub fn new(templates: Vec<QueryTemplate>) -> Result<Self, ConfigError> {
        if templates.is_empty() {
            return Err(ConfigError("query catalog is empty".into()));
        }
        let mut seen = HashSet::new();
        for t in &templates {
            if !seen.insert(t.id.as_str()) {
                return Err(ConfigError(format!("duplicate query id '{}'", t.id)));
            }
        }
        Ok(Self { templates })
    }

    pub fn from_defs(defs: &[QueryDef]) -> Result<Self, ConfigError> {
        if defs.is_empty() {
            return Ok(Self::standard());
        }
        let templates = defs
            .iter()
            .map(|d| QueryTemplate::new(&d.id, &d.sql, d.max_rows))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(templates)
    }

    /// Full scan, ordered scan, equality filter, filtered aggregate over the
    /// generated sales dataset.
    pub fn standard() -> Self {
        let defs = [
            ("full_scan", "SELECT * FROM {table}", None),
            ("ordered_scan", "SELECT * FROM {table} ORDER BY sale_id", None),
            (
                "equality_filter",
                "SELECT * FROM {table} WHERE sale_id = 4242",
                Some(1),
            ),
            (
                "filtered_aggregate",
                "SELECT region, COUNT(*) AS sales, SUM(amount) AS revenue FROM {table} \
                 WHERE sale_date >= '2024-07-01' GROUP BY region",
                Some(crate::dataset::REGIONS.len() as u64),
            ),
        ];
        let templates = defs
            .iter()
            .filter_map(|(id, sql, max)| QueryTemplate::new(id, sql, *max).ok())
            .collect();
        Self { templates }
    }

    pub fn get(&self, id: &str) -> Option<&QueryTemplate> {
        self.templates.iter().find(|t| t.id == id)
    }

    /// Declaration order.
    pub fn all(&self) -> &[QueryTemplate] {
        &self.templates
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.templates.iter().position(|t| t.id == id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.templates.iter().map(|t| t.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_catalog_order() {
        let c = QueryCatalog::standard();
        assert_eq!(
            c.ids(),
            vec![
                "full_scan",
                "ordered_scan",
                "equality_filter",
                "filtered_aggregate"
            ]
        );
        assert_eq!(c.get("equality_filter").unwrap().max_rows, Some(1));
        assert!(c.get("nope").is_none());
    }

    #[test]
    fn test_realize_quotes_physical_name() {
        let t = QueryTemplate::new("q", "SELECT count(*) FROM {table} WHERE a = 1", None).unwrap();
        let name = PhysicalName::for_variant("heap").unwrap();
        assert_eq!(
            t.realize(&name),
            "SELECT count(*) FROM \"lb_heap\" WHERE a = 1"
        );
    }

    #[test]
    fn test_rejects_foreign_placeholders() {
        let err = QueryTemplate::new("q", "SELECT * FROM {table} WHERE id = {id}", None).unwrap_err();
        assert!(err.0.contains("{id}"));
    }

    #[test]
    fn test_requires_table_placeholder() {
        assert!(QueryTemplate::new("q", "SELECT 1", None).is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let defs = vec![
            QueryDef {
                id: "a".into(),
                sql: "SELECT * FROM {table}".into(),
                max_rows: None,
            },
            QueryDef {
                id: "a".into(),
                sql: "SELECT 1 FROM {table}".into(),
                max_rows: None,
            },
        ];
        assert!(QueryCatalog::from_defs(&defs).is_err());
    }

    #[test]
    fn test_empty_defs_fall_back_to_standard() {
        assert_eq!(QueryCatalog::from_defs(&[]).unwrap(), QueryCatalog::standard());
    }
}
