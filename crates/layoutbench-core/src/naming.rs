//! Identifier validation and the physical names the harness is allowed to
//! splice into SQL.

use crate::errors::ConfigError;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;

const VARIANT_PREFIX: &str = "lb_";

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("static regex"))
}

pub fn validate_identifier(kind: &str, value: &str) -> Result<(), ConfigError> {
    if identifier_re().is_match(value) {
        Ok(())
    } else {
        Err(ConfigError(format!(
            "invalid {} '{}': use letters, digits and '_' (max 63 chars, not starting with a digit)",
            kind, value
        )))
    }
}

/// Quote an identifier for SQL, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// A validated table/view name. The only kind of value template substitution accepts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct PhysicalName(String);

impl PhysicalName {
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        validate_identifier("table name", name)?;
        Ok(Self(name.to_string()))
    }

    pub fn for_variant(variant_id: &str) -> Result<Self, ConfigError> {
        validate_identifier("variant id", variant_id)?;
        Self::parse(&format!("{VARIANT_PREFIX}{variant_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn quoted(&self) -> String {
        quote_ident(&self.0)
    }
}

impl fmt::Display for PhysicalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
