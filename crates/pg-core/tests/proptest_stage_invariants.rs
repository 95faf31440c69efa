//! Property-based invariant tests for stage mutations.
//!
//! 1. No association ever names an absent entity after any sequence of
//!    connect / delete-edge / delete-entity operations.
//! 2. Deleting an entity removes every association touching it.
//! 3. The resolution pass is idempotent.
//! 4. Reachability is reflexive and agrees with petgraph's `has_path_connecting`.
//! 5. Containment stays a forest: one parent per entity, no cycles, and
//!    every section's live children are listed in its child identifiers.

use pg_core::id::StageId;
use pg_core::model::*;
use pg_core::{ConnectivityIndex, Point, Stage, StageContent, StageSettings};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::collections::HashSet;

const NODES: usize = 6;

#[derive(Debug, Clone)]
enum Op {
    Connect(usize, usize),
    DeleteEdge(usize),
    DeleteEntity(usize),
    Reverse(usize),
    /// Bit `i` selects the `i`-th live entity.
    Pack(u8),
    AddTextIn(usize),
    GoIn(usize, usize),
    GoOut(usize),
    SwitchCollapse(usize),
    DeleteSection(usize),
    Unpack(usize),
}

// ── Helpers ─────────────────────────────────────────────────────────────

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..NODES, 0..NODES).prop_map(|(a, b)| Op::Connect(a, b)),
        2 => (0usize..32).prop_map(Op::DeleteEdge),
        1 => (0..NODES).prop_map(Op::DeleteEntity),
        1 => (0usize..32).prop_map(Op::Reverse),
        2 => any::<u8>().prop_map(Op::Pack),
        1 => (0usize..8).prop_map(Op::AddTextIn),
        2 => (0usize..16, 0usize..8).prop_map(|(e, s)| Op::GoIn(e, s)),
        1 => (0usize..16).prop_map(Op::GoOut),
        1 => (0usize..8).prop_map(Op::SwitchCollapse),
        1 => (0usize..8).prop_map(Op::DeleteSection),
        1 => (0usize..8).prop_map(Op::Unpack),
    ]
}

fn containment_op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => any::<u8>().prop_map(Op::Pack),
        2 => (0usize..8).prop_map(Op::AddTextIn),
        3 => (0usize..16, 0usize..8).prop_map(|(e, s)| Op::GoIn(e, s)),
        2 => (0usize..16).prop_map(Op::GoOut),
        1 => (0usize..8).prop_map(Op::SwitchCollapse),
        1 => (0usize..8).prop_map(Op::DeleteSection),
        1 => (0usize..8).prop_map(Op::Unpack),
        1 => (0..NODES).prop_map(Op::DeleteEntity),
    ]
}

fn build(allow_cycles: bool) -> (Stage, Vec<StageId>) {
    let mut stage = Stage::with_settings(StageSettings {
        allow_add_cycle_edge: allow_cycles,
        ..StageSettings::default()
    });
    let ids = (0..NODES)
        .map(|i| stage.add_text_node(Point::new(i as f64 * 150.0, 0.0), &[]))
        .collect();
    (stage, ids)
}

fn apply(stage: &mut Stage, ids: &[StageId], op: &Op) {
    let nth_edge = |stage: &Stage, n: usize| {
        let edges = stage.content.associations.ids();
        (!edges.is_empty()).then(|| edges[n % edges.len()])
    };
    let nth_entity = |stage: &Stage, n: usize| {
        let live = stage.content.entities.ids();
        (!live.is_empty()).then(|| live[n % live.len()])
    };
    let nth_section = |stage: &Stage, n: usize| {
        let sections: Vec<StageId> = stage.content.sections().map(|e| e.id).collect();
        (!sections.is_empty()).then(|| sections[n % sections.len()])
    };
    match *op {
        Op::Connect(a, b) => {
            stage.connect_entity(ids[a], ids[b]);
        }
        Op::DeleteEdge(n) => {
            if let Some(edge) = nth_edge(stage, n) {
                assert!(stage.delete_edge(edge));
            }
        }
        Op::DeleteEntity(i) => {
            stage.delete_entities(&[ids[i]]);
        }
        Op::Reverse(n) => {
            if let Some(edge) = nth_edge(stage, n) {
                stage.reverse_edges(&[edge]);
            }
        }
        Op::Pack(mask) => {
            let live = stage.content.entities.ids();
            let members: Vec<StageId> = live
                .iter()
                .take(8)
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, id)| *id)
                .collect();
            let before = stage.content.clone();
            if stage.pack_entity_to_section(&members).is_err() {
                assert_eq!(stage.content, before, "refused pack must not mutate");
            }
        }
        Op::AddTextIn(n) => {
            if let Some(section) = nth_section(stage, n) {
                let at = stage.content.entity(section).map_or(Point::ZERO, |e| e.center());
                stage.add_text_node(at, &[section]);
            }
        }
        Op::GoIn(e, s) => {
            if let (Some(entity), Some(section)) = (nth_entity(stage, e), nth_section(stage, s)) {
                stage.go_in_section(&[entity], section);
            }
        }
        Op::GoOut(e) => {
            if let Some(entity) = nth_entity(stage, e) {
                if let Some(parent) = stage.content.parent_of(entity) {
                    assert!(stage.go_out_section(&[entity], parent));
                }
            }
        }
        Op::SwitchCollapse(n) => {
            if let Some(section) = nth_section(stage, n) {
                stage.switch_collapse(&[section]);
            }
        }
        Op::DeleteSection(n) => {
            if let Some(section) = nth_section(stage, n) {
                stage.delete_entities(&[section]);
            }
        }
        Op::Unpack(n) => {
            if let Some(section) = nth_section(stage, n) {
                let parent = stage.content.parent_of(section);
                let children = stage.unpack_section(section).unwrap_or_default();
                for child in children {
                    assert_eq!(stage.content.parent_of(child), parent);
                }
            }
        }
    }
}

fn check_containment(content: &StageContent) -> Result<(), TestCaseError> {
    let mut listed: HashSet<StageId> = HashSet::new();
    for section in content.sections() {
        let Some(data) = section.as_section() else { continue };
        for &child in &data.children {
            prop_assert!(data.child_ids.contains(&child), "{child} not in child ids of {}", section.id);
            prop_assert!(content.is_entity_exists(child), "{child} is gone");
            prop_assert!(listed.insert(child), "{child} has two parents");
            prop_assert_eq!(content.parent_of(child), Some(section.id));
        }
    }
    for entity in content.entities() {
        if let Some(parent) = entity.parent {
            let data = content.section(parent);
            prop_assert!(data.is_some_and(|d| d.children.contains(&entity.id)));
        }
        let mut seen = HashSet::from([entity.id]);
        let mut collapsed_above = false;
        let mut cursor = entity.parent;
        while let Some(up) = cursor {
            prop_assert!(seen.insert(up), "containment cycle through {}", entity.id);
            collapsed_above |= content.section(up).is_some_and(|d| d.collapsed);
            cursor = content.parent_of(up);
        }
        prop_assert_eq!(entity.hidden_by_collapse, collapsed_above, "hidden flag of {}", entity.id);
    }
    Ok(())
}

proptest! {
    #[test]
    fn endpoints_never_dangle(
        ops in proptest::collection::vec(op_strategy(), 0..40),
        allow_cycles in any::<bool>(),
    ) {
        let (mut stage, ids) = build(allow_cycles);
        for op in &ops {
            apply(&mut stage, &ids, op);
            for assoc in stage.content.associations() {
                prop_assert!(stage.content.is_entity_exists(assoc.source.id()));
                prop_assert!(stage.content.is_entity_exists(assoc.target.id()));
                prop_assert!(allow_cycles || assoc.source.id() != assoc.target.id());
            }
            check_containment(&stage.content)?;
        }
    }

    #[test]
    fn containment_stays_a_forest(ops in proptest::collection::vec(containment_op_strategy(), 0..40)) {
        let (mut stage, ids) = build(false);
        for op in &ops {
            apply(&mut stage, &ids, op);
            check_containment(&stage.content)?;
        }
        stage.content.resolve_references();
        let once = stage.content.clone();
        stage.content.resolve_references();
        prop_assert_eq!(&stage.content, &once);
        check_containment(&stage.content)?;
    }

    #[test]
    fn delete_cascades(
        edges in proptest::collection::vec((0..NODES, 0..NODES), 0..20),
        victim in 0..NODES,
    ) {
        let (mut stage, ids) = build(true);
        for (a, b) in edges {
            stage.connect_entity(ids[a], ids[b]);
        }
        stage.delete_entities(&[ids[victim]]);
        prop_assert!(stage.content.associations().all(|a| !a.touches(ids[victim])));
        prop_assert!(stage.content.edges_of(ids[victim]).is_empty());
    }

    #[test]
    fn resolution_is_idempotent(ops in proptest::collection::vec(op_strategy(), 0..30)) {
        let (mut stage, ids) = build(true);
        for op in &ops {
            apply(&mut stage, &ids, op);
        }
        stage.content.resolve_references();
        let once = stage.content.clone();
        stage.content.resolve_references();
        prop_assert_eq!(&stage.content, &once);
        check_containment(&stage.content)?;
    }

    #[test]
    fn reachability_matches_petgraph(
        edges in proptest::collection::vec((0..NODES, 0..NODES), 0..15),
        from in 0..NODES,
        to in 0..NODES,
    ) {
        let (mut stage, ids) = build(true);
        for (a, b) in edges {
            stage.connect_entity(ids[a], ids[b]);
        }
        prop_assert!(stage.content.is_connected(ids[from], ids[from]));

        let index = ConnectivityIndex::build(&stage.content);
        let expected = from == to || petgraph::algo::has_path_connecting(
            &index.graph,
            index.nodes[&ids[from]],
            index.nodes[&ids[to]],
            None,
        );
        prop_assert_eq!(stage.content.is_connected(ids[from], ids[to]), expected);
    }
}

#[test]
fn shifting_flags_match_pairwise_definition() {
    let (mut stage, ids) = build(true);
    for (a, b) in [(0, 1), (1, 0), (2, 3), (3, 3), (4, 5), (4, 5)] {
        stage.connect_entity(ids[a], ids[b]);
    }
    stage.content.resolve_references();
    let all: Vec<&Association> = stage.content.associations().collect();
    for e in &all {
        let pairwise = all
            .iter()
            .any(|o| o.source.id() == e.target.id() && o.target.id() == e.source.id());
        assert_eq!(e.shifting, pairwise, "{:?}", e.id);
    }
}
