//! Graph construction from unit descriptors.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::{debug, info};

use super::DependencyGraph;
use crate::core::{Confidence, Edge, EdgeKind, Node, TableRef, UnitDescriptor};
use crate::errors::SchemaError;

/// Builds a [`DependencyGraph`] from loader output.
///
/// Table overlaps between a producer's outputs and a consumer's inputs
/// become DATA edges (LOOKUP when the consumer marks the table as reference
/// data). Explicit calls become TIMING edges with high confidence.
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    units: Vec<UnitDescriptor>,
}

impl GraphBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a unit.
    #[must_use]
    pub fn unit(mut self, unit: UnitDescriptor) -> Self {
        self.units.push(unit);
        self
    }

    /// Adds several units.
    #[must_use]
    pub fn units(mut self, units: impl IntoIterator<Item = UnitDescriptor>) -> Self {
        self.units.extend(units);
        self
    }

    /// Returns the number of units added so far.
    #[must_use]
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Builds the graph.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] for empty or duplicate ids, unparseable
    /// table references, and explicit calls to unknown units or to the unit
    /// itself.
    pub fn build(self) -> Result<DependencyGraph, SchemaError> {
        let mut graph = DependencyGraph::new();
        let mut seen: HashSet<&str> = HashSet::new();

        for unit in &self.units {
            if unit.id.trim().is_empty() {
                return Err(SchemaError::new("Unit with an empty id"));
            }
            if !seen.insert(unit.id.as_str()) {
                return Err(SchemaError::duplicate_unit(&unit.id));
            }
            graph.add_node(to_node(unit)?);
        }

        let mut producers: BTreeMap<String, Vec<(String, TableRef)>> = BTreeMap::new();
        for node in graph.nodes() {
            for table in &node.outputs {
                producers
                    .entry(table.name().to_string())
                    .or_default()
                    .push((node.id.clone(), table.clone()));
            }
        }

        let mut edges = Vec::new();
        for consumer in graph.nodes() {
            for input in &consumer.inputs {
                let Some(candidates) = producers.get(input.name()) else {
                    continue;
                };
                for (producer_id, output) in candidates {
                    if producer_id == &consumer.id {
                        continue;
                    }
                    let Some(confidence) = output.match_confidence(input) else {
                        continue;
                    };
                    let kind = if consumer.is_lookup(input) {
                        EdgeKind::Lookup
                    } else {
                        EdgeKind::Data
                    };
                    edges.push(Edge::new(
                        producer_id.clone(),
                        consumer.id.clone(),
                        kind,
                        confidence,
                        format!("{} writes {output}, {} reads {input}", producer_id, consumer.id),
                    ));
                }
            }
        }

        for unit in &self.units {
            for callee in &unit.explicit_calls {
                if callee == &unit.id {
                    return Err(SchemaError::new(format!("Unit '{}' calls itself", unit.id))
                        .with_units(vec![unit.id.clone()]));
                }
                if !graph.contains_node(callee) {
                    return Err(SchemaError::unknown_unit(&unit.id, callee));
                }
                edges.push(Edge::new(
                    unit.id.clone(),
                    callee.clone(),
                    EdgeKind::Timing,
                    Confidence::High,
                    format!("explicit call {} -> {callee}", unit.id),
                ));
            }
        }

        let inferred = edges.len();
        for edge in edges {
            graph.insert_edge(edge);
        }

        debug!(
            candidate_edges = inferred,
            merged_edges = graph.edge_count(),
            "Deduplicated dependency edges"
        );
        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "Built dependency graph"
        );

        Ok(graph)
    }
}

fn parse_tables(unit: &str, field: &str, raw: &[String]) -> Result<BTreeSet<TableRef>, SchemaError> {
    raw.iter()
        .map(|table| {
            TableRef::parse(table).map_err(|reason| {
                SchemaError::new(format!("Unit '{unit}' has an invalid {field} entry: {reason}"))
                    .with_units(vec![unit.to_string()])
            })
        })
        .collect()
}

fn to_node(unit: &UnitDescriptor) -> Result<Node, SchemaError> {
    let mut inputs = parse_tables(&unit.id, "input", &unit.inputs)?;
    let outputs = parse_tables(&unit.id, "output", &unit.outputs)?;
    let lookups = parse_tables(&unit.id, "lookup", &unit.lookups)?;
    inputs.extend(lookups.iter().cloned());

    Ok(Node {
        id: unit.id.clone(),
        kind: unit.kind,
        inputs,
        outputs,
        lookups,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NodeKind;

    #[test]
    fn test_exact_qualified_match_is_high_confidence() {
        let graph = GraphBuilder::new()
            .unit(UnitDescriptor::transformation("a").with_outputs(["sales.orders"]))
            .unit(UnitDescriptor::transformation("b").with_inputs(["SALES.ORDERS"]))
            .build()
            .unwrap();

        let edge = graph.edge("a", "b").unwrap();
        assert_eq!(edge.kind, EdgeKind::Data);
        assert_eq!(edge.confidence, Confidence::High);
    }

    #[test]
    fn test_name_only_match_confidence() {
        let graph = GraphBuilder::new()
            .unit(UnitDescriptor::transformation("a").with_outputs(["sales.orders"]))
            .unit(UnitDescriptor::transformation("b").with_inputs(["orders"]))
            .unit(UnitDescriptor::transformation("c").with_outputs(["customers"]))
            .unit(UnitDescriptor::transformation("d").with_inputs(["customers"]))
            .build()
            .unwrap();

        assert_eq!(graph.edge("a", "b").unwrap().confidence, Confidence::Medium);
        assert_eq!(graph.edge("c", "d").unwrap().confidence, Confidence::Low);
    }

    #[test]
    fn test_different_schemas_do_not_match() {
        let graph = GraphBuilder::new()
            .unit(UnitDescriptor::transformation("a").with_outputs(["stage.orders"]))
            .unit(UnitDescriptor::transformation("b").with_inputs(["dwh.orders"]))
            .build()
            .unwrap();

        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_lookup_inputs_produce_lookup_edges() {
        let graph = GraphBuilder::new()
            .unit(UnitDescriptor::transformation("dim").with_outputs(["dwh.dim_customer"]))
            .unit(UnitDescriptor::transformation("fact").with_lookups(["dwh.dim_customer"]))
            .build()
            .unwrap();

        assert_eq!(graph.edge("dim", "fact").unwrap().kind, EdgeKind::Lookup);
    }

    #[test]
    fn test_explicit_call_creates_timing_edge() {
        let graph = GraphBuilder::new()
            .unit(UnitDescriptor::orchestration("wf").with_calls(["job"]))
            .unit(UnitDescriptor::transformation("job"))
            .build()
            .unwrap();

        let edge = graph.edge("wf", "job").unwrap();
        assert_eq!(edge.kind, EdgeKind::Timing);
        assert_eq!(edge.confidence, Confidence::High);
        assert_eq!(graph.node("wf").unwrap().kind, NodeKind::Orchestration);
    }

    #[test]
    fn test_data_edge_keeps_timing_evidence() {
        let graph = GraphBuilder::new()
            .unit(
                UnitDescriptor::transformation("a")
                    .with_outputs(["orders"])
                    .with_calls(["b"]),
            )
            .unit(UnitDescriptor::transformation("b").with_inputs(["orders"]))
            .build()
            .unwrap();

        let edge = graph.edge("a", "b").unwrap();
        assert_eq!(edge.kind, EdgeKind::Data);
        assert_eq!(edge.confidence, Confidence::High);
        assert!(edge.evidence.iter().any(|e| e.starts_with("explicit call")));
        assert!(edge.evidence.iter().any(|e| e.contains("reads orders")));
    }

    #[test]
    fn test_unknown_call_is_schema_error() {
        let err = GraphBuilder::new()
            .unit(UnitDescriptor::orchestration("wf").with_calls(["ghost"]))
            .build()
            .unwrap_err();

        assert_eq!(err.units, vec!["wf", "ghost"]);
        assert_eq!(err.error_info.code, "SCHEMA_ERROR");
    }

    #[test]
    fn test_duplicate_and_empty_ids_rejected() {
        let dup = GraphBuilder::new()
            .unit(UnitDescriptor::transformation("a"))
            .unit(UnitDescriptor::transformation("a"))
            .build();
        assert!(dup.is_err());

        let empty = GraphBuilder::new()
            .unit(UnitDescriptor::transformation("  "))
            .build();
        assert!(empty.is_err());
    }

    #[test]
    fn test_self_call_rejected_but_self_read_ignored() {
        let self_call = GraphBuilder::new()
            .unit(UnitDescriptor::transformation("a").with_calls(["a"]))
            .build();
        assert!(self_call.is_err());

        let incremental = GraphBuilder::new()
            .unit(
                UnitDescriptor::transformation("a")
                    .with_inputs(["dwh.history"])
                    .with_outputs(["dwh.history"]),
            )
            .build()
            .unwrap();
        assert_eq!(incremental.edge_count(), 0);
    }

    #[test]
    fn test_invalid_table_reference() {
        let err = GraphBuilder::new()
            .unit(UnitDescriptor::transformation("a").with_inputs(["sales."]))
            .build()
            .unwrap_err();
        assert!(err.message.contains("invalid input"));
    }
}
