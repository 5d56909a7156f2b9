//! Execution planning
//!
//! Turns a [`DeclarationSet`] into an [`ExecutionPlan`]: one node per
//! declared resource plus one per purged value, wired into an
//! [`ActionGraph`] and topologically ordered.
//!
//! Edges, besides explicit `depends_on`:
//! - **creation**: nearest declared PRESENT ancestor key -> every present
//!   resource and purge deletion beneath it
//! - **deletion**: every resource beneath a declared ABSENT key -> that
//!   key's node, so contents go first

use crate::accessor::RegistryAccessor;
use crate::config::RunConfig;
use crate::dag::{ActionGraph, EdgeKind};
use crate::declaration::DeclarationSet;
use crate::differ::{self, Step};
use crate::error::PlanError;
use crate::purge;
use crate::types::{Action, Ensure, Operation, Origin, Resource, ResourceId};
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

/// One resource's planned work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanNode {
    pub id: ResourceId,
    pub origin: Origin,
    pub step: Step,
}

impl PlanNode {
    /// The mutation, if this node applies one
    #[must_use]
    pub fn action(&self) -> Option<Action> {
        self.step.operation().map(|operation| Action {
            id: self.id.clone(),
            operation: operation.clone(),
            origin: self.origin,
        })
    }
}

/// Ordered, validated work for one run
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    run_id: Uuid,
    nodes: Vec<PlanNode>,
    graph: ActionGraph,
    order: Vec<usize>,
}

impl ExecutionPlan {
    #[inline]
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    #[inline]
    #[must_use]
    pub fn nodes(&self) -> &[PlanNode] {
        &self.nodes
    }

    #[inline]
    #[must_use]
    pub fn graph(&self) -> &ActionGraph {
        &self.graph
    }

    /// Node indices in topological order
    #[inline]
    #[must_use]
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn position(&self, id: &ResourceId) -> Option<usize> {
        self.nodes.iter().position(|node| node.id == *id)
    }

    /// Whether planning already failed some resource
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.nodes
            .iter()
            .any(|node| matches!(node.step, Step::Failed(_)))
    }

    /// Actions in execution order
    #[must_use]
    pub fn actions(&self) -> Vec<Action> {
        self.order
            .iter()
            .filter_map(|&i| self.nodes[i].action())
            .collect()
    }

    /// Human readable action list, failures marked
    #[must_use]
    pub fn describe(&self) -> Vec<String> {
        self.order
            .iter()
            .filter_map(|&i| {
                let node = &self.nodes[i];
                match &node.step {
                    Step::InSync => None,
                    Step::Failed(e) => {
                        Some(format!("{} {}: {e}", crate::report::ERROR_MARKER, node.id))
                    }
                    Step::Apply(Operation::SetValue { data, .. }) => {
                        node.action().map(|action| format!("{action} = {data}"))
                    }
                    Step::Apply(_) => node.action().map(|action| action.to_string()),
                }
            })
            .collect()
    }
}

/// Builds plans against a registry snapshot taken while planning
pub struct Planner<'a> {
    accessor: &'a dyn RegistryAccessor,
    config: &'a RunConfig,
}

impl<'a> Planner<'a> {
    #[must_use]
    pub fn new(accessor: &'a dyn RegistryAccessor, config: &'a RunConfig) -> Self {
        Self { accessor, config }
    }

    pub fn plan(&self, declarations: &DeclarationSet) -> Result<ExecutionPlan, PlanError> {
        let mut nodes: Vec<PlanNode> = declarations
            .iter()
            .map(|resource| PlanNode {
                id: resource.id(),
                origin: Origin::Managed,
                step: differ::diff(self.accessor, resource, declarations),
            })
            .collect();

        let mut index: HashMap<ResourceId, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.id.clone(), i))
            .collect();

        self.add_purge_nodes(declarations, &mut nodes, &mut index)?;
        let graph = build_graph(declarations, &nodes, &index);

        let order = graph.order().map_err(|cycles| PlanError::Cycle {
            cycles: cycles
                .into_iter()
                .map(|members| members.into_iter().map(|i| nodes[i].id.clone()).collect())
                .collect(),
        })?;

        let plan = ExecutionPlan {
            run_id: Uuid::new_v4(),
            nodes,
            graph,
            order,
        };
        info!(
            run_id = %plan.run_id,
            nodes = plan.len(),
            actions = plan.actions().len(),
            edges = plan.graph.edge_count(),
            "plan built"
        );
        Ok(plan)
    }

    fn add_purge_nodes(
        &self,
        declarations: &DeclarationSet,
        nodes: &mut Vec<PlanNode>,
        index: &mut HashMap<ResourceId, usize>,
    ) -> Result<(), PlanError> {
        for resource in declarations.iter() {
            let Resource::Key(key) = resource else {
                continue;
            };
            if !purge::purge_enabled(key, self.config.purge_values) {
                continue;
            }
            let key_node = index[&key.id()];
            // A key created this run has nothing to purge; a failed one is
            // left alone.
            if nodes[key_node].step != Step::InSync {
                continue;
            }

            match purge::plan_purge(self.accessor, key, declarations) {
                Ok(doomed) => {
                    for id in doomed {
                        if index.contains_key(&id) {
                            return Err(PlanError::Conflict {
                                id,
                                reason: "purged value is also declared".to_string(),
                            });
                        }
                        index.insert(id.clone(), nodes.len());
                        nodes.push(PlanNode {
                            id,
                            origin: Origin::Purge,
                            step: Step::Apply(Operation::DeleteValue),
                        });
                    }
                }
                Err(e) => nodes[key_node].step = Step::Failed(e.into()),
            }
        }
        Ok(())
    }
}

fn build_graph(
    declarations: &DeclarationSet,
    nodes: &[PlanNode],
    index: &HashMap<ResourceId, usize>,
) -> ActionGraph {
    let mut graph = ActionGraph::with_nodes(nodes.len());

    for resource in declarations.iter() {
        let node = index[&resource.id()];
        for dep in resource.depends_on() {
            graph.add_edge(index[dep], node, EdgeKind::Explicit);
        }
    }

    for (node, plan_node) in nodes.iter().enumerate() {
        let Some(ancestor) = declarations.nearest_key(&plan_node.id) else {
            continue;
        };
        let ancestor_node = index[&ancestor.id()];
        let present = match plan_node.origin {
            Origin::Purge => true,
            Origin::Managed => declarations
                .get(&plan_node.id)
                .is_some_and(|resource| resource.ensure() == Ensure::Present),
        };

        match ancestor.ensure {
            Ensure::Present if present => {
                graph.add_edge(ancestor_node, node, EdgeKind::Creation);
            }
            Ensure::Absent => {
                graph.add_edge(node, ancestor_node, EdgeKind::Deletion);
            }
            Ensure::Present => {}
        }
    }

    debug!(edges = graph.edge_count(), "graph built");
    graph
}
