//! DAG builder for constructing prerequisite graphs from phases.
//!
//! The builder takes a list of phases with their prerequisites and constructs
//! a directed acyclic graph that the scheduler walks to find eligible phases.

use crate::errors::PlanValidationError;
use crate::phase::Phase;
use std::collections::{HashMap, HashSet};

/// Index into the phase list.
pub type PhaseIndex = usize;

/// A directed acyclic graph of phases.
#[derive(Debug)]
pub struct PhaseGraph {
    /// Phases indexed by their position
    phases: Vec<Phase>,
    /// Map from phase id to index
    index_map: HashMap<String, PhaseIndex>,
    /// Forward edges: index -> phases that require it
    forward_edges: Vec<Vec<PhaseIndex>>,
    /// Reverse edges: index -> phases it requires
    reverse_edges: Vec<Vec<PhaseIndex>>,
    /// Topological order, ties broken by phase id
    topo_order: Vec<PhaseIndex>,
}

impl PhaseGraph {
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn get_phase(&self, index: PhaseIndex) -> Option<&Phase> {
        self.phases.get(index)
    }

    pub fn get_phase_by_id(&self, id: &str) -> Option<&Phase> {
        self.index_map.get(id).and_then(|&i| self.phases.get(i))
    }

    pub fn get_index(&self, id: &str) -> Option<PhaseIndex> {
        self.index_map.get(id).copied()
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// Phases that require the given phase (forward edges).
    pub fn dependents(&self, index: PhaseIndex) -> &[PhaseIndex] {
        self.forward_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Phases the given phase requires (reverse edges).
    pub fn dependencies(&self, index: PhaseIndex) -> &[PhaseIndex] {
        self.reverse_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Phase indices in an order where every prerequisite precedes its dependents.
    pub fn topological_order(&self) -> &[PhaseIndex] {
        &self.topo_order
    }

    /// Phases with no prerequisites (entry points).
    pub fn root_phases(&self) -> Vec<PhaseIndex> {
        self.reverse_edges
            .iter()
            .enumerate()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(i, _)| i)
            .collect()
    }

    /// Phases nothing else requires (exit points).
    pub fn leaf_phases(&self) -> Vec<PhaseIndex> {
        self.forward_edges
            .iter()
            .enumerate()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(i, _)| i)
            .collect()
    }

    /// Check if all prerequisites of a phase are in `satisfied`.
    pub fn dependencies_satisfied(
        &self,
        index: PhaseIndex,
        satisfied: &HashSet<PhaseIndex>,
    ) -> bool {
        self.dependencies(index)
            .iter()
            .all(|dep| satisfied.contains(dep))
    }
}

/// Builder for constructing phase graphs.
pub struct DagBuilder {
    phases: Vec<Phase>,
}

impl DagBuilder {
    pub fn new(phases: Vec<Phase>) -> Self {
        Self { phases }
    }

    /// Build the phase graph.
    ///
    /// This validates the graph structure:
    /// - Phase ids are unique
    /// - Retry bounds match the phase kind
    /// - All prerequisites reference existing phases
    /// - No cycles are allowed
    pub fn build(self) -> Result<PhaseGraph, PlanValidationError> {
        let mut index_map = HashMap::new();
        for (i, phase) in self.phases.iter().enumerate() {
            if index_map.contains_key(&phase.id) {
                return Err(PlanValidationError::DuplicateId {
                    id: phase.id.clone(),
                });
            }
            index_map.insert(phase.id.clone(), i);
        }

        for phase in &self.phases {
            Self::validate_retry_bound(phase)?;
        }

        let mut forward_edges: Vec<Vec<PhaseIndex>> = vec![Vec::new(); self.phases.len()];
        let mut reverse_edges: Vec<Vec<PhaseIndex>> = vec![Vec::new(); self.phases.len()];

        for (to_idx, phase) in self.phases.iter().enumerate() {
            for prerequisite in &phase.prerequisites {
                let from_idx = *index_map.get(prerequisite).ok_or_else(|| {
                    PlanValidationError::UnknownPrerequisite {
                        phase: phase.id.clone(),
                        prerequisite: prerequisite.clone(),
                    }
                })?;

                forward_edges[from_idx].push(to_idx);
                reverse_edges[to_idx].push(from_idx);
            }
        }

        let mut graph = PhaseGraph {
            phases: self.phases,
            index_map,
            forward_edges,
            reverse_edges,
            topo_order: Vec::new(),
        };

        graph.topo_order = Self::topological_sort(&graph)?;

        Ok(graph)
    }

    fn validate_retry_bound(phase: &Phase) -> Result<(), PlanValidationError> {
        let message = if phase.kind.is_gate() && phase.max_retries == 0 {
            "gates need at least one attempt"
        } else if !phase.kind.is_gate() && phase.max_retries > 0 {
            "only gates may retry"
        } else {
            return Ok(());
        };
        Err(PlanValidationError::InvalidRetryBound {
            phase: phase.id.clone(),
            kind: phase.kind.to_string(),
            max_retries: phase.max_retries,
            message: message.to_string(),
        })
    }

    /// Kahn's algorithm. Ready nodes are taken in id order so the result is deterministic.
    fn topological_sort(graph: &PhaseGraph) -> Result<Vec<PhaseIndex>, PlanValidationError> {
        let mut in_degree: Vec<usize> = graph.reverse_edges.iter().map(|deps| deps.len()).collect();

        let mut ready: Vec<PhaseIndex> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(i, _)| i)
            .collect();

        let mut order = Vec::with_capacity(graph.len());

        while !ready.is_empty() {
            // Keep the lowest id at the end so pop() yields it.
            ready.sort_by(|a, b| graph.phases[*b].id.cmp(&graph.phases[*a].id));
            let Some(node) = ready.pop() else { break };
            order.push(node);

            for &dependent in graph.dependents(node) {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(dependent);
                }
            }
        }

        if order.len() != graph.len() {
            let mut involved: Vec<String> = in_degree
                .iter()
                .enumerate()
                .filter(|&(_, deg)| *deg > 0)
                .filter_map(|(i, _)| graph.get_phase(i).map(|p| p.id.clone()))
                .collect();
            involved.sort();

            return Err(PlanValidationError::Cycle { involved });
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::PhaseKind;

    fn phase(id: &str, deps: Vec<&str>) -> Phase {
        Phase::new(
            id,
            &format!("Phase {}", id),
            PhaseKind::Subagent,
            deps.into_iter().map(String::from).collect(),
        )
    }

    #[test]
    fn test_build_simple_graph() {
        let phases = vec![
            phase("01", vec![]),
            phase("02", vec!["01"]),
            phase("03", vec!["01"]),
            phase("04", vec!["02", "03"]),
        ];

        let graph = DagBuilder::new(phases).build().unwrap();

        assert_eq!(graph.len(), 4);
        assert_eq!(graph.root_phases(), vec![0]);
        assert_eq!(graph.leaf_phases(), vec![3]);
    }

    #[test]
    fn test_dependencies_and_dependents() {
        let phases = vec![
            phase("01", vec![]),
            phase("02", vec!["01"]),
            phase("03", vec!["01"]),
        ];

        let graph = DagBuilder::new(phases).build().unwrap();

        assert!(graph.dependencies(0).is_empty());
        assert_eq!(graph.dependencies(1), &[0]);
        assert_eq!(graph.dependencies(2), &[0]);
        let dependents = graph.dependents(0);
        assert!(dependents.contains(&1));
        assert!(dependents.contains(&2));
    }

    #[test]
    fn test_topological_order_respects_prerequisites_and_ids() {
        // Declared out of order on purpose
        let phases = vec![
            phase("03", vec!["01"]),
            phase("02", vec![]),
            phase("01", vec![]),
            phase("04", vec!["03", "02"]),
        ];

        let graph = DagBuilder::new(phases).build().unwrap();
        let ids: Vec<&str> = graph
            .topological_order()
            .iter()
            .map(|&i| graph.get_phase(i).unwrap().id.as_str())
            .collect();

        assert_eq!(ids, vec!["01", "02", "03", "04"]);
    }

    #[test]
    fn test_cycle_detection() {
        let phases = vec![
            phase("01", vec!["03"]),
            phase("02", vec!["01"]),
            phase("03", vec!["02"]),
        ];

        let err = DagBuilder::new(phases).build().unwrap_err();
        assert_eq!(
            err,
            PlanValidationError::Cycle {
                involved: vec!["01".into(), "02".into(), "03".into()]
            }
        );
    }

    #[test]
    fn test_self_cycle_detection() {
        let phases = vec![phase("01", vec!["01"])];
        let err = DagBuilder::new(phases).build().unwrap_err();
        assert!(matches!(err, PlanValidationError::Cycle { .. }));
    }

    #[test]
    fn test_missing_dependency() {
        let phases = vec![phase("01", vec!["nonexistent"])];

        let err = DagBuilder::new(phases).build().unwrap_err();
        assert!(matches!(
            err,
            PlanValidationError::UnknownPrerequisite { ref prerequisite, .. } if prerequisite == "nonexistent"
        ));
    }

    #[test]
    fn test_duplicate_phase_id() {
        let phases = vec![phase("01", vec![]), phase("01", vec![])];

        let err = DagBuilder::new(phases).build().unwrap_err();
        assert_eq!(err, PlanValidationError::DuplicateId { id: "01".into() });
    }

    #[test]
    fn test_gate_without_retries_is_rejected() {
        let mut gate = Phase::new("02", "Gate", PhaseKind::Gate, vec![]);
        gate.max_retries = 0;

        let err = DagBuilder::new(vec![gate]).build().unwrap_err();
        assert!(matches!(err, PlanValidationError::InvalidRetryBound { .. }));
    }

    #[test]
    fn test_non_gate_with_retries_is_rejected() {
        let mut step = phase("01", vec![]);
        step.max_retries = 2;

        let err = DagBuilder::new(vec![step]).build().unwrap_err();
        assert!(err.to_string().contains("only gates may retry"));
    }

    #[test]
    fn test_empty_graph() {
        let graph = DagBuilder::new(vec![]).build().unwrap();
        assert!(graph.is_empty());
        assert!(graph.topological_order().is_empty());
    }

    #[test]
    fn test_dependencies_satisfied() {
        let phases = vec![
            phase("01", vec![]),
            phase("02", vec!["01"]),
            phase("03", vec!["01", "02"]),
        ];

        let graph = DagBuilder::new(phases).build().unwrap();
        let mut passed = HashSet::new();

        assert!(graph.dependencies_satisfied(0, &passed));
        assert!(!graph.dependencies_satisfied(1, &passed));

        passed.insert(0);
        assert!(graph.dependencies_satisfied(1, &passed));
        assert!(!graph.dependencies_satisfied(2, &passed));

        passed.insert(1);
        assert!(graph.dependencies_satisfied(2, &passed));
    }
}
