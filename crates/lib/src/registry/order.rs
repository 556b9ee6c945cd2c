//! Restart ordering over `restart_after` edges.

use std::collections::{BTreeSet, HashMap};

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use super::types::{Component, RegistryError};

/// Order components so every component restarts after the ones it names in
/// `restart_after`, ties broken by registry order, with the orchestrator last.
pub(crate) fn restart_order(components: &[Component], orchestrator: &str) -> Result<Vec<String>, RegistryError> {
  let mut graph: DiGraph<&str, ()> = DiGraph::new();
  let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();

  for component in components.iter().filter(|c| c.name != orchestrator) {
    nodes.insert(&component.name, graph.add_node(&component.name));
  }

  for component in components.iter().filter(|c| c.name != orchestrator) {
    let dependent = nodes[component.name.as_str()];
    for dependency in &component.restart_after {
      let Some(&dep) = nodes.get(dependency.as_str()) else {
        return Err(RegistryError::RestartsAfterOrchestrator {
          component: component.name.clone(),
        });
      };
      graph.add_edge(dep, dependent, ());
    }
  }

  toposort(&graph, None).map_err(|cycle| RegistryError::Cycle(graph[cycle.node_id()].to_string()))?;

  // Kahn's algorithm; node indices follow registry order, so the ready set
  // yields the earliest registered component first.
  let mut in_degree: HashMap<NodeIndex, usize> = graph
    .node_indices()
    .map(|idx| (idx, graph.neighbors_directed(idx, Direction::Incoming).count()))
    .collect();
  let mut ready: BTreeSet<NodeIndex> = in_degree.iter().filter(|(_, d)| **d == 0).map(|(i, _)| *i).collect();
  let mut order = Vec::with_capacity(components.len());

  while let Some(idx) = ready.pop_first() {
    order.push(graph[idx].to_string());
    for next in graph.neighbors_directed(idx, Direction::Outgoing) {
      if let Some(degree) = in_degree.get_mut(&next) {
        *degree -= 1;
        if *degree == 0 {
          ready.insert(next);
        }
      }
    }
  }

  order.push(orchestrator.to_string());
  Ok(order)
}
