//! Integrity check of the dependency graph.
//!
//! The graph covers explicit needs plus the implicit stage edges of
//! stage-scheduled processables. Stage edges go through one barrier node per
//! stage so the check stays linear in the number of processables.

use super::Pipeline;
use crate::core::{ProcessableId, SchedulingType};
use crate::errors::GraphIntegrityError;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Node {
    Job(ProcessableId),
    Barrier(u32),
}

struct DependencyGraph<'a> {
    pipeline: &'a Pipeline,
    /// Latest lineages per stage index, stage indices ascending.
    members: BTreeMap<u32, Vec<ProcessableId>>,
}

impl<'a> DependencyGraph<'a> {
    fn new(pipeline: &'a Pipeline) -> Self {
        let mut members: BTreeMap<u32, Vec<ProcessableId>> = BTreeMap::new();
        for processable in pipeline.latest() {
            members
                .entry(processable.stage_index)
                .or_default()
                .push(processable.lineage);
        }
        Self { pipeline, members }
    }

    fn previous_stage(&self, stage_index: u32) -> Option<u32> {
        self.members
            .range(..stage_index)
            .next_back()
            .map(|(index, _)| *index)
    }

    fn dependencies(&self, node: Node) -> Vec<Node> {
        match node {
            Node::Job(lineage) => {
                let Some(processable) = self.pipeline.latest_of(lineage) else {
                    return Vec::new();
                };
                match processable.scheduling_type {
                    SchedulingType::Dag => processable.needs.iter().copied().map(Node::Job).collect(),
                    SchedulingType::Stage => self
                        .previous_stage(processable.stage_index)
                        .map(|_| vec![Node::Barrier(processable.stage_index)])
                        .unwrap_or_default(),
                }
            }
            Node::Barrier(stage_index) => {
                let Some(previous) = self.previous_stage(stage_index) else {
                    return Vec::new();
                };
                let mut deps: Vec<Node> = self
                    .members
                    .get(&previous)
                    .into_iter()
                    .flatten()
                    .copied()
                    .map(Node::Job)
                    .collect();
                if self.previous_stage(previous).is_some() {
                    deps.push(Node::Barrier(previous));
                }
                deps
            }
        }
    }

    fn label(&self, node: Node) -> String {
        match node {
            Node::Job(lineage) => self
                .pipeline
                .latest_of(lineage)
                .map_or_else(|| lineage.to_string(), |p| p.name.clone()),
            Node::Barrier(stage_index) => {
                let stage = self
                    .pipeline
                    .stage_names()
                    .get(stage_index as usize)
                    .cloned()
                    .unwrap_or_else(|| stage_index.to_string());
                format!("[stage {stage}]")
            }
        }
    }

    fn dfs_cycle(
        &self,
        node: Node,
        visited: &mut HashSet<Node>,
        rec_stack: &mut HashSet<Node>,
        path: &mut Vec<Node>,
    ) -> Option<Vec<Node>> {
        visited.insert(node);
        rec_stack.insert(node);
        path.push(node);

        for dep in self.dependencies(node) {
            if !visited.contains(&dep) {
                if let Some(cycle) = self.dfs_cycle(dep, visited, rec_stack, path) {
                    return Some(cycle);
                }
            } else if rec_stack.contains(&dep) {
                let start = path.iter().position(|n| *n == dep).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(dep);
                return Some(cycle);
            }
        }

        path.pop();
        rec_stack.remove(&node);
        None
    }
}

/// Verifies that every need resolves and that the dependency graph is acyclic.
///
/// # Errors
///
/// Returns a `GraphIntegrityError` describing the first dangling need or
/// cycle found.
pub fn verify(pipeline: &Pipeline) -> Result<(), GraphIntegrityError> {
    for processable in pipeline.latest() {
        if let Some(need) = processable
            .needs
            .iter()
            .find(|need| pipeline.latest_of(**need).is_none())
        {
            return Err(GraphIntegrityError::dangling_need(&processable.name, *need));
        }
    }

    let graph = DependencyGraph::new(pipeline);
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    for processable in pipeline.latest() {
        let node = Node::Job(processable.lineage);
        if visited.contains(&node) {
            continue;
        }
        if let Some(cycle) = graph.dfs_cycle(node, &mut visited, &mut rec_stack, &mut path) {
            // Dependencies point upstream; report the cycle in execution order.
            let mut names: Vec<String> = cycle.into_iter().map(|n| graph.label(n)).collect();
            names.reverse();
            return Err(GraphIntegrityError::cycle(names));
        }
    }

    Ok(())
}
