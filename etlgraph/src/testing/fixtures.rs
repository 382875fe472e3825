//! Descriptor sets for common graph shapes.
//!
//! Every fixture writes schema-qualified tables so edges are high
//! confidence and no mapping review is triggered.

use crate::core::UnitDescriptor;

fn table(id: &str) -> String {
    format!("stage.t_{}", id.to_lowercase())
}

/// A straight line: each unit reads the previous unit's table.
#[must_use]
pub fn chain(ids: &[&str]) -> Vec<UnitDescriptor> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| {
            let unit = UnitDescriptor::transformation(*id).with_outputs([table(id)]);
            match i.checked_sub(1).and_then(|prev| ids.get(prev)) {
                Some(prev) => unit.with_inputs([table(prev)]),
                None => unit,
            }
        })
        .collect()
}

/// `A` feeds `B` and `C`, which both feed `D`.
#[must_use]
pub fn diamond() -> Vec<UnitDescriptor> {
    vec![
        UnitDescriptor::transformation("A").with_outputs([table("A")]),
        UnitDescriptor::transformation("B")
            .with_inputs([table("A")])
            .with_outputs([table("B")]),
        UnitDescriptor::transformation("C")
            .with_inputs([table("A")])
            .with_outputs([table("C")]),
        UnitDescriptor::transformation("D")
            .with_inputs([table("B"), table("C")])
            .with_outputs([table("D")]),
    ]
}

/// A ring of DATA edges: each unit reads the previous one, the first reads
/// the last.
#[must_use]
pub fn data_cycle(ids: &[&str]) -> Vec<UnitDescriptor> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| {
            let prev = if i == 0 { ids[ids.len() - 1] } else { ids[i - 1] };
            UnitDescriptor::transformation(*id)
                .with_inputs([table(prev)])
                .with_outputs([table(id)])
        })
        .collect()
}

/// `A → B → C` over DATA, closed by `C → A` where `A` reads `C`'s table as
/// reference data.
#[must_use]
pub fn lookup_cycle() -> Vec<UnitDescriptor> {
    vec![
        UnitDescriptor::transformation("A")
            .with_outputs([table("A")])
            .with_lookups([table("C")]),
        UnitDescriptor::transformation("B")
            .with_inputs([table("A")])
            .with_outputs([table("B")]),
        UnitDescriptor::transformation("C")
            .with_inputs([table("B")])
            .with_outputs([table("C")]),
    ]
}

/// `load` feeds `check` over DATA and `check` calls `load` again, closing a
/// TIMING cycle.
#[must_use]
pub fn timing_cycle() -> Vec<UnitDescriptor> {
    vec![
        UnitDescriptor::transformation("load").with_outputs([table("load")]),
        UnitDescriptor::orchestration("check")
            .with_inputs([table("load")])
            .with_calls(["load"]),
    ]
}

/// A DATA ring of `size` units named `n00`, `n01`, ...
#[must_use]
pub fn ring(size: usize) -> Vec<UnitDescriptor> {
    let ids: Vec<String> = (0..size).map(|i| format!("n{i:02}")).collect();
    let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    if refs.is_empty() {
        return Vec::new();
    }
    data_cycle(&refs)
}

/// `layers` layers of `width` units; every unit reads every table of the
/// previous layer.
#[must_use]
pub fn layered(layers: usize, width: usize) -> Vec<UnitDescriptor> {
    let id = |layer: usize, col: usize| format!("l{layer:02}_{col:03}");
    let mut units = Vec::with_capacity(layers * width);
    for layer in 0..layers {
        for col in 0..width {
            let this = id(layer, col);
            let mut unit = UnitDescriptor::transformation(this.as_str()).with_outputs([table(&this)]);
            if layer > 0 {
                unit = unit.with_inputs((0..width).map(|c| table(&id(layer - 1, c))));
            }
            units.push(unit);
        }
    }
    units
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_links_previous_output() {
        let units = chain(&["A", "B"]);
        assert!(units[0].inputs.is_empty());
        assert_eq!(units[1].inputs, vec!["stage.t_a"]);
    }

    #[test]
    fn test_data_cycle_closes_ring() {
        let units = data_cycle(&["A", "B", "C"]);
        assert_eq!(units[0].inputs, vec!["stage.t_c"]);
        assert_eq!(ring(3).len(), 3);
        assert!(ring(0).is_empty());
    }

    #[test]
    fn test_layered_size() {
        let units = layered(3, 4);
        assert_eq!(units.len(), 12);
        assert_eq!(units[4].inputs.len(), 4);
    }
}
