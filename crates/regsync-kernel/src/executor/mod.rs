//! Execution phase
//!
//! The executor only accepts an [`ExecutionPlan`]; every declaration check
//! already happened while planning. It:
//! - starts a node once all its predecessors settled successfully
//! - runs up to `max_workers` actions concurrently
//! - skips every transitive dependent of a FAILED or SKIPPED node
//! - stops scheduling on cancellation and lets in-flight actions finish
//!
//! Registry calls themselves go through an [`ActionApplier`].

use crate::accessor::RegistryAccessor;
use crate::differ::Step;
use crate::error::{AccessError, ActionError};
use crate::plan::ExecutionPlan;
use crate::report::{Outcome, OutcomeStatus};
use crate::state_machine::{ActionState, StateTable};
use crate::types::{Action, Operation, ResourceId};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// What applying an action did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Changed,
    /// Target was already in the desired state, e.g. deleted concurrently
    AlreadySatisfied,
}

/// Applies a single action
///
/// Implement this trait to route actions somewhere other than a
/// [`RegistryAccessor`], or to wrap one with extra behavior.
#[async_trait::async_trait]
pub trait ActionApplier: Send + Sync {
    async fn apply(&self, action: &Action) -> Result<Applied, ActionError>;
}

/// Applies actions through a registry accessor on the blocking pool
#[derive(Debug, Clone)]
pub struct RegistryApplier {
    accessor: Arc<dyn RegistryAccessor>,
    timeout: Duration,
}

impl RegistryApplier {
    #[must_use]
    pub fn new(accessor: Arc<dyn RegistryAccessor>, timeout: Duration) -> Self {
        Self { accessor, timeout }
    }
}

#[async_trait::async_trait]
impl ActionApplier for RegistryApplier {
    async fn apply(&self, action: &Action) -> Result<Applied, ActionError> {
        let accessor = Arc::clone(&self.accessor);
        let owned = action.clone();
        let call = tokio::task::spawn_blocking(move || apply_blocking(accessor.as_ref(), &owned));

        // A timed out call keeps running on the blocking pool; its result
        // is discarded.
        match tokio::time::timeout(self.timeout, call).await {
            Err(_) => Err(ActionError::Timeout(self.timeout)),
            Ok(Err(join)) => Err(ActionError::Aborted(join.to_string())),
            Ok(Ok(result)) => result,
        }
    }
}

/// Perform one action synchronously
pub fn apply_blocking(
    accessor: &dyn RegistryAccessor,
    action: &Action,
) -> Result<Applied, ActionError> {
    let key = action.id.key_path();
    match (&action.operation, &action.id) {
        (Operation::CreateKey, ResourceId::Key(_)) => {
            accessor.create(key)?;
            Ok(Applied::Changed)
        }
        (Operation::DeleteKey, ResourceId::Key(_)) => Ok(absent_ok(accessor.delete(key, true))?),
        (Operation::SetValue { data, .. }, ResourceId::Value { name, .. }) => {
            match accessor.set_value(key, name, data) {
                Ok(()) => Ok(Applied::Changed),
                Err(AccessError::NotFound(_)) => Err(ActionError::OwnerKeyMissing(key.to_string())),
                Err(e) => Err(e.into()),
            }
        }
        (Operation::DeleteValue, ResourceId::Value { name, .. }) => {
            Ok(absent_ok(accessor.delete_value(key, name))?)
        }
        (operation, id) => Err(ActionError::Aborted(format!(
            "{} cannot be applied to {id}",
            operation.kind()
        ))),
    }
}

// Deleting something that is already gone converges without a change.
fn absent_ok(result: Result<(), AccessError>) -> Result<Applied, AccessError> {
    match result {
        Ok(()) => Ok(Applied::Changed),
        Err(AccessError::NotFound(_)) => Ok(Applied::AlreadySatisfied),
        Err(e) => Err(e),
    }
}

/// Plan executor
pub struct Executor {
    applier: Arc<dyn ActionApplier>,
    max_workers: usize,
    cancel: CancellationToken,
}

impl Executor {
    #[must_use]
    pub fn new(applier: Arc<dyn ActionApplier>, max_workers: usize) -> Self {
        Self {
            applier,
            max_workers: max_workers.max(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Stop scheduling new actions once `token` is cancelled
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Execute every node; outcomes come back in plan order
    pub async fn run(&self, plan: &ExecutionPlan) -> Vec<Outcome> {
        let span = info_span!("execute", run_id = %plan.run_id(), nodes = plan.len());
        self.run_inner(plan).instrument(span).await
    }

    async fn run_inner(&self, plan: &ExecutionPlan) -> Vec<Outcome> {
        let mut run = RunState::new(plan);
        let mut in_flight: JoinSet<Result<Applied, ActionError>> = JoinSet::new();
        // Task ids map back to nodes, so a panicked or aborted task still settles
        let mut running: HashMap<task::Id, usize> = HashMap::new();

        loop {
            while in_flight.len() < self.max_workers {
                let Some(Reverse(node)) = run.ready.pop() else {
                    break;
                };
                let Some(action) = run.admit(node, &self.cancel) else {
                    continue;
                };

                let applier = Arc::clone(&self.applier);
                let span = info_span!("action", id = %action.id, kind = %action.kind());
                let handle =
                    in_flight.spawn(async move { applier.apply(&action).await }.instrument(span));
                running.insert(handle.id(), node);
            }

            let Some(joined) = in_flight.join_next_with_id().await else {
                break;
            };
            let (id, result) = match joined {
                Ok((id, result)) => (id, result),
                Err(join) => (join.id(), Err(ActionError::Aborted(join.to_string()))),
            };
            let Some(node) = running.remove(&id) else {
                warn!(task = %id, "completed task has no node");
                continue;
            };
            match result {
                Ok(Applied::Changed) => run.settle(node, ActionState::Changed, None),
                Ok(Applied::AlreadySatisfied) => run.settle(node, ActionState::Unchanged, None),
                Err(e) => run.settle(node, ActionState::Failed, Some(e)),
            }
        }

        run.finish()
    }
}

/// Bookkeeping for one execution
struct RunState<'a> {
    plan: &'a ExecutionPlan,
    states: StateTable,
    outcomes: Vec<Option<Outcome>>,
    waiting_on: Vec<usize>,
    /// First failed node upstream of each blocked node
    blocked_by: Vec<Option<ResourceId>>,
    ready: BinaryHeap<Reverse<usize>>,
}

impl<'a> RunState<'a> {
    fn new(plan: &'a ExecutionPlan) -> Self {
        let len = plan.len();
        let waiting_on: Vec<usize> = (0..len).map(|i| plan.graph().in_degree(i)).collect();
        let ready = waiting_on
            .iter()
            .enumerate()
            .filter(|(_, waiting)| **waiting == 0)
            .map(|(i, _)| Reverse(i))
            .collect();
        Self {
            plan,
            states: StateTable::new(len),
            outcomes: vec![None; len],
            waiting_on,
            blocked_by: vec![None; len],
            ready,
        }
    }

    /// Settle nodes that need no work; returns the action to run otherwise
    fn admit(&mut self, node: usize, cancel: &CancellationToken) -> Option<Action> {
        if cancel.is_cancelled() {
            self.settle(node, ActionState::Skipped, Some(ActionError::Cancelled));
            return None;
        }
        if let Some(cause) = self.blocked_by[node].clone() {
            self.settle(node, ActionState::Skipped, Some(ActionError::DependencyFailed(cause)));
            return None;
        }

        let plan = self.plan;
        let plan_node = &plan.nodes()[node];
        match &plan_node.step {
            Step::InSync => {
                self.settle(node, ActionState::Unchanged, None);
                None
            }
            Step::Failed(e) => {
                let e = e.clone();
                self.settle(node, ActionState::Failed, Some(e));
                None
            }
            Step::Apply(_) => {
                let action = plan_node.action();
                self.transition(node, ActionState::Running);
                action
            }
        }
    }

    fn settle(&mut self, node: usize, state: ActionState, error: Option<ActionError>) {
        self.transition(node, state);
        let plan = self.plan;
        let plan_node = &plan.nodes()[node];
        match (&state, &error) {
            (ActionState::Changed, _) => info!(id = %plan_node.id, "changed"),
            (_, Some(e)) => warn!(id = %plan_node.id, ?state, error = %e, "not applied"),
            _ => debug!(id = %plan_node.id, ?state, "settled"),
        }

        // Dependents of a skipped node inherit its root cause
        let cause = state.blocks_dependents().then(|| match &error {
            Some(ActionError::DependencyFailed(root)) => root.clone(),
            _ => plan_node.id.clone(),
        });

        let status = match state {
            ActionState::Changed => OutcomeStatus::Changed,
            ActionState::Failed => OutcomeStatus::Failed,
            ActionState::Skipped => OutcomeStatus::Skipped,
            _ => OutcomeStatus::Unchanged,
        };
        self.outcomes[node] = Some(Outcome::for_node(plan_node, status, error));

        for next in plan.graph().successors(node) {
            if self.blocked_by[next].is_none() {
                self.blocked_by[next] = cause.clone();
            }
            self.waiting_on[next] -= 1;
            if self.waiting_on[next] == 0 {
                self.ready.push(Reverse(next));
            }
        }
    }

    fn transition(&mut self, node: usize, to: ActionState) {
        if let Err(e) = self.states.transition(node, to) {
            warn!(id = %self.plan.nodes()[node].id, error = %e, "state machine violation");
        }
    }

    /// Outcomes in plan order. A node that never settled is skipped behind
    /// its failed dependency when it has one, and failed otherwise.
    fn finish(mut self) -> Vec<Outcome> {
        let plan = self.plan;
        plan.order()
            .iter()
            .map(|&node| {
                self.outcomes[node].take().unwrap_or_else(|| {
                    let (status, error) = match self.blocked_by[node].take() {
                        Some(cause) => {
                            (OutcomeStatus::Skipped, ActionError::DependencyFailed(cause))
                        }
                        None => (
                            OutcomeStatus::Failed,
                            ActionError::Aborted("node never settled".to_string()),
                        ),
                    };
                    Outcome::for_node(&plan.nodes()[node], status, Some(error))
                })
            })
            .collect()
    }
}
