//! Reachability analysis over the flow state graph.
//!
//! Builds a petgraph `DiGraph` with one node per state and an edge per
//! declared transition, then walks it from the initial state. Cycles are
//! legal in conversation flows (re-prompt loops, cart editing), so this
//! is a pure reachability audit, not a DAG check.

use std::collections::{HashMap, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;

use ordino_types::flow::FlowDefinition;

/// States that cannot be reached from the initial state, sorted by name.
///
/// Edges follow declared transitions and validator `on_invalid` targets.
/// The cancel interrupt can jump to the configured cancel state (first
/// final state as fallback) from anywhere, so that target counts as
/// reachable whenever the initial state is.
pub fn unreachable_states(flow: &FlowDefinition) -> Vec<String> {
    let mut names: Vec<&str> = flow.states.keys().map(String::as_str).collect();
    names.sort_unstable();

    let mut graph = DiGraph::<&str, ()>::new();
    let mut index: HashMap<&str, NodeIndex> = HashMap::with_capacity(names.len());
    for name in &names {
        index.insert(*name, graph.add_node(*name));
    }

    for name in &names {
        let state = &flow.states[*name];
        let Some(&from) = index.get(name) else {
            continue;
        };

        let mut targets: Vec<&str> = state.transitions.values().map(String::as_str).collect();
        if let Some(validator) = &state.validator {
            if let Some(escape) = &validator.on_invalid {
                targets.push(escape);
            }
        }
        targets.sort_unstable();
        targets.dedup();

        for target in targets {
            if let Some(&to) = index.get(target) {
                graph.add_edge(from, to, ());
            }
        }
    }

    // The cancel target is reachable from any state via interrupt
    let cancel_target = flow
        .settings
        .cancel_state
        .as_deref()
        .or_else(|| flow.first_final_state());
    if let Some(target) = cancel_target {
        if let Some(&from) = index.get(flow.initial_state.as_str()) {
            if let Some(&to) = index.get(target) {
                graph.add_edge(from, to, ());
            }
        }
    }

    let Some(&start) = index.get(flow.initial_state.as_str()) else {
        // Undeclared initial state is a structural error reported elsewhere;
        // reachability has no anchor, so report nothing
        return Vec::new();
    };

    let mut visited = HashSet::new();
    let mut dfs = Dfs::new(&graph, start);
    while let Some(node) = dfs.next(&graph) {
        visited.insert(node);
    }

    names
        .iter()
        .filter(|name| index.get(*name).is_some_and(|idx| !visited.contains(idx)))
        .map(|name| name.to_string())
        .collect()
}
