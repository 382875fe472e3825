//! Unit descriptors, table references and graph nodes.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

use super::Confidence;

static VARIABLE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\$\{([a-z0-9_]+)\}").ok());

/// The kind of schedulable unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// A unit that reads and writes tables.
    Transformation,
    /// A unit that sequences other units.
    Orchestration,
}

impl Default for NodeKind {
    fn default() -> Self {
        Self::Transformation
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transformation => write!(f, "transformation"),
            Self::Orchestration => write!(f, "orchestration"),
        }
    }
}

/// A normalized table reference.
///
/// Parsing trims whitespace, strips identifier quoting and lowercases.
/// Everything before the last `.` is the qualifier (schema or db.schema).
/// A qualifier may be a `${VAR}` placeholder that is only bound at run time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableRef {
    qualifier: Option<String>,
    name: String,
}

impl TableRef {
    /// Parses a raw table reference.
    ///
    /// # Errors
    ///
    /// Returns an error message if the reference is empty or has an empty segment.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let cleaned: String = raw
            .trim()
            .chars()
            .filter(|c| !matches!(c, '"' | '`' | '[' | ']'))
            .collect::<String>()
            .to_lowercase();

        if cleaned.is_empty() {
            return Err("table reference is empty".to_string());
        }

        let segments: Vec<&str> = cleaned.split('.').map(str::trim).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(format!("table reference '{}' has an empty segment", raw.trim()));
        }

        let (name, qualifier) = match segments.split_last() {
            Some((name, [])) => ((*name).to_string(), None),
            Some((name, rest)) => ((*name).to_string(), Some(rest.join("."))),
            None => return Err("table reference is empty".to_string()),
        };

        Ok(Self { qualifier, name })
    }

    /// The unqualified table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The schema (or db.schema) prefix, if any.
    #[must_use]
    pub fn qualifier(&self) -> Option<&str> {
        self.qualifier.as_deref()
    }

    /// Returns true if the reference carries a qualifier.
    #[must_use]
    pub fn is_qualified(&self) -> bool {
        self.qualifier.is_some()
    }

    /// Names of the `${VAR}` placeholders in the reference, uppercased.
    #[must_use]
    pub fn variables(&self) -> Vec<String> {
        let Some(pattern) = VARIABLE.as_ref() else {
            return Vec::new();
        };
        let raw = self.to_string();
        pattern
            .captures_iter(&raw)
            .filter_map(|captures| captures.get(1))
            .map(|name| name.as_str().to_uppercase())
            .collect()
    }

    /// Returns true if any part of the reference is a placeholder.
    #[must_use]
    pub fn has_variable(&self) -> bool {
        self.to_string().contains("${")
    }

    /// How confidently `self` (a producer output) and `other` (a consumer
    /// input) name the same table.
    ///
    /// Two qualified references must agree on the qualifier unless one of
    /// them is a placeholder, which matches with medium confidence until the
    /// variable is resolved. A qualified and a name-only reference match on
    /// name with medium confidence; two name-only references match with low
    /// confidence.
    #[must_use]
    pub fn match_confidence(&self, other: &Self) -> Option<Confidence> {
        if self.name != other.name {
            return None;
        }
        match (&self.qualifier, &other.qualifier) {
            (Some(a), Some(b)) if a == b => Some(Confidence::High),
            (Some(a), Some(b)) if a.contains("${") || b.contains("${") => {
                Some(Confidence::Medium)
            }
            (Some(_), Some(_)) => None,
            (Some(_), None) | (None, Some(_)) => Some(Confidence::Medium),
            (None, None) => Some(Confidence::Low),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(q) => write!(f, "{}.{}", q, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl TryFrom<String> for TableRef {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TableRef> for String {
    fn from(value: TableRef) -> Self {
        value.to_string()
    }
}

/// A unit as supplied by the metadata loader.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitDescriptor {
    /// Unique unit id.
    pub id: String,
    /// Unit kind.
    pub kind: NodeKind,
    /// Tables read by the unit.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Tables written by the unit.
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Units this unit explicitly invokes; each becomes an ordering edge.
    #[serde(default)]
    pub explicit_calls: Vec<String>,
    /// Subset of `inputs` only read as reference data.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lookups: Vec<String>,
}

impl UnitDescriptor {
    /// Creates a descriptor for a transformation unit.
    #[must_use]
    pub fn transformation(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::Transformation,
            ..Self::default()
        }
    }

    /// Creates a descriptor for an orchestration unit.
    #[must_use]
    pub fn orchestration(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::Orchestration,
            ..Self::default()
        }
    }

    /// Adds input tables.
    #[must_use]
    pub fn with_inputs(mut self, tables: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.inputs.extend(tables.into_iter().map(Into::into));
        self
    }

    /// Adds output tables.
    #[must_use]
    pub fn with_outputs(mut self, tables: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.outputs.extend(tables.into_iter().map(Into::into));
        self
    }

    /// Adds lookup tables. They are also added to the inputs.
    #[must_use]
    pub fn with_lookups(mut self, tables: impl IntoIterator<Item = impl Into<String>>) -> Self {
        for table in tables {
            let table = table.into();
            if !self.inputs.contains(&table) {
                self.inputs.push(table.clone());
            }
            self.lookups.push(table);
        }
        self
    }

    /// Adds explicit calls.
    #[must_use]
    pub fn with_calls(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.explicit_calls.extend(ids.into_iter().map(Into::into));
        self
    }
}

/// A node in the dependency graph. Immutable once the graph is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Unique node id.
    pub id: String,
    /// Node kind.
    pub kind: NodeKind,
    /// Tables read.
    pub inputs: BTreeSet<TableRef>,
    /// Tables written.
    pub outputs: BTreeSet<TableRef>,
    /// Inputs only read as reference data.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub lookups: BTreeSet<TableRef>,
}

impl Node {
    /// Returns true if `table` is read only as reference data.
    #[must_use]
    pub fn is_lookup(&self, table: &TableRef) -> bool {
        self.lookups.contains(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_ref_normalization() {
        let table = TableRef::parse("  \"DWH\".[Customers] ").unwrap();
        assert_eq!(table.to_string(), "dwh.customers");
        assert_eq!(table.name(), "customers");
        assert_eq!(table.qualifier(), Some("dwh"));
        assert!(table.is_qualified());
    }

    #[test]
    fn test_table_ref_multi_part_qualifier() {
        let table = TableRef::parse("prod.sales.orders").unwrap();
        assert_eq!(table.qualifier(), Some("prod.sales"));
        assert_eq!(table.name(), "orders");
    }

    #[test]
    fn test_table_ref_rejects_empty() {
        assert!(TableRef::parse("").is_err());
        assert!(TableRef::parse("   ").is_err());
        assert!(TableRef::parse("sales.").is_err());
        assert!(TableRef::parse(".orders").is_err());
    }

    #[test]
    fn test_placeholder_qualifier() {
        let table = TableRef::parse("${EKIP_SCHEMA}.contracts").unwrap();
        assert_eq!(table.qualifier(), Some("${ekip_schema}"));
        assert_eq!(table.variables(), vec!["EKIP_SCHEMA"]);
        assert!(table.has_variable());
        assert!(!TableRef::parse("ekip.contracts").unwrap().has_variable());

        let concrete = TableRef::parse("ekip.contracts").unwrap();
        assert_eq!(table.match_confidence(&concrete), Some(Confidence::Medium));
        assert_eq!(concrete.match_confidence(&table), Some(Confidence::Medium));
        assert_eq!(table.match_confidence(&table), Some(Confidence::High));
        assert_eq!(
            table.match_confidence(&TableRef::parse("ekip.loans").unwrap()),
            None
        );
    }

    #[test]
    fn test_match_confidence() {
        let qualified = TableRef::parse("sales.orders").unwrap();
        let other_schema = TableRef::parse("stage.orders").unwrap();
        let bare = TableRef::parse("orders").unwrap();

        assert_eq!(qualified.match_confidence(&qualified), Some(Confidence::High));
        assert_eq!(qualified.match_confidence(&bare), Some(Confidence::Medium));
        assert_eq!(bare.match_confidence(&qualified), Some(Confidence::Medium));
        assert_eq!(bare.match_confidence(&bare), Some(Confidence::Low));
        assert_eq!(qualified.match_confidence(&other_schema), None);
        assert_eq!(
            bare.match_confidence(&TableRef::parse("customers").unwrap()),
            None
        );
    }

    #[test]
    fn test_descriptor_deserialize_camel_case() {
        let json = r#"{
            "id": "load_orders",
            "kind": "orchestration",
            "inputs": ["raw.orders"],
            "outputs": ["dwh.orders"],
            "explicitCalls": ["stage_orders"]
        }"#;

        let unit: UnitDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(unit.kind, NodeKind::Orchestration);
        assert_eq!(unit.explicit_calls, vec!["stage_orders".to_string()]);
        assert!(unit.lookups.is_empty());
    }

    #[test]
    fn test_with_lookups_adds_inputs_once() {
        let unit = UnitDescriptor::transformation("a")
            .with_inputs(["dim.customer"])
            .with_lookups(["dim.customer", "dim.region"]);

        assert_eq!(unit.inputs, vec!["dim.customer", "dim.region"]);
        assert_eq!(unit.lookups.len(), 2);
    }

    #[test]
    fn test_table_ref_serde_as_string() {
        let table = TableRef::parse("Sales.Orders").unwrap();
        let json = serde_json::to_string(&table).unwrap();
        assert_eq!(json, r#""sales.orders""#);

        let back: TableRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, table);
        assert!(serde_json::from_str::<TableRef>(r#""""#).is_err());
    }
}
