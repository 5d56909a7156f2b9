//! Reconciliation runs
//!
//! Wires the pipeline: declarations -> differ -> purge -> graph ->
//! executor -> report. Planning reads the registry on the blocking pool,
//! each read bounded like an action; a [`PlanError`] aborts the run before
//! any mutation.

use crate::accessor::{BoundedAccessor, RegistryAccessor};
use crate::config::RunConfig;
use crate::declaration::DeclarationSet;
use crate::error::PlanError;
use crate::executor::{ActionApplier, Executor, RegistryApplier};
use crate::path::PathResolver;
use crate::plan::{ExecutionPlan, Planner};
use crate::report::Report;
use crate::types::Resource;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

/// Entry point for planning and applying declarations
pub struct Reconciler {
    accessor: Arc<dyn RegistryAccessor>,
    applier: Arc<dyn ActionApplier>,
    config: RunConfig,
}

impl Reconciler {
    /// Reconciler applying through `accessor` itself
    #[must_use]
    pub fn new(accessor: Arc<dyn RegistryAccessor>, config: RunConfig) -> Self {
        let applier = Arc::new(RegistryApplier::new(Arc::clone(&accessor), config.action_timeout));
        Self {
            accessor,
            applier,
            config,
        }
    }

    /// Replace the applier; planning still reads through the accessor
    #[must_use]
    pub fn with_applier(mut self, applier: Arc<dyn ActionApplier>) -> Self {
        self.applier = applier;
        self
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Resolver matching this run's host and default view
    #[must_use]
    pub fn resolver(&self) -> PathResolver {
        self.config.resolver(self.accessor.host_arch())
    }

    /// Build the plan on the blocking pool; each registry read is bounded
    /// by the action timeout
    pub async fn plan(&self, resources: Vec<Resource>) -> Result<ExecutionPlan, PlanError> {
        let accessor = Arc::clone(&self.accessor);
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            let bounded = BoundedAccessor::new(accessor, config.action_timeout, Handle::current());
            plan_with(&bounded, &config, resources)
        })
        .await
        .map_err(|e| PlanError::Aborted(e.to_string()))?
    }

    /// Plan and execute
    pub async fn apply(&self, resources: Vec<Resource>) -> Result<Report, PlanError> {
        self.apply_with_cancellation(resources, CancellationToken::new())
            .await
    }

    /// Plan and execute; cancelling `token` stops scheduling new actions
    pub async fn apply_with_cancellation(
        &self,
        resources: Vec<Resource>,
        token: CancellationToken,
    ) -> Result<Report, PlanError> {
        let plan = self.plan(resources).await?;

        let span = info_span!("reconcile", run_id = %plan.run_id());
        let report = async {
            let outcomes = Executor::new(Arc::clone(&self.applier), self.config.max_workers)
                .with_cancellation(token)
                .run(&plan)
                .await;
            let report = Report::new(plan.run_id(), outcomes);
            let summary = report.summary();
            info!(
                changed = summary.changed,
                unchanged = summary.unchanged,
                failed = summary.failed,
                skipped = summary.skipped,
                "run finished"
            );
            report
        }
        .instrument(span)
        .await;
        Ok(report)
    }
}

fn plan_with(
    accessor: &dyn RegistryAccessor,
    config: &RunConfig,
    resources: Vec<Resource>,
) -> Result<ExecutionPlan, PlanError> {
    let resolver = config.resolver(accessor.host_arch());
    let declarations =
        DeclarationSet::build_with_purge_default(resources, &resolver, config.purge_values)?;
    Planner::new(accessor, config).plan(&declarations)
}
