//! regsync kernel
//!
//! Converges Windows Registry state to a declared set of keys and values.
//! A run is split in two phases, the same way every time:
//!
//! 1. **Planning**: resolve paths, deduplicate declarations, diff each
//!    resource against the registry, add purge deletions, and order the
//!    resulting actions in a dependency graph. Invalid declarations (bad
//!    paths, cycles, conflicts) fail here and nothing is applied.
//! 2. **Execution**: apply the planned actions along independent branches
//!    of the graph, recording one [`report::Outcome`] per resource.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use regsync_kernel::prelude::*;
//!
//! let registry = Arc::new(MemoryRegistry::new(HostArch::X64));
//! let resolver = PathResolver::new(registry.host_arch(), View::Native);
//!
//! let key = resolver.parse(r"HKLM\Software\Vendor\T1")?;
//! let resources = vec![Resource::Key(KeyResource::present(key))];
//!
//! let reconciler = Reconciler::new(registry, RunConfig::default());
//! let report = reconciler.apply(resources).await?;
//! print!("{}", report.render_text(false));
//! ```

// Identity and data
pub mod error;
pub mod path;
pub mod types;

// Registry boundary
pub mod accessor;

// Planning phase
pub mod dag;
pub mod declaration;
pub mod differ;
pub mod plan;
pub mod purge;

// Execution phase
pub mod executor;
pub mod state_machine;

// Run surface
pub mod config;
pub mod logging;
pub mod manifest;
pub mod reconciler;
pub mod report;

// Re-exports
pub use error::*;
pub use types::*;

/// Common imports for driving a reconciliation run
pub mod prelude {
    pub use crate::accessor::{MemoryRegistry, RegistryAccessor};
    pub use crate::config::RunConfig;
    pub use crate::error::{AccessError, ActionError, ParseError, PlanError};
    pub use crate::executor::{ActionApplier, Applied, Executor, RegistryApplier};
    pub use crate::manifest::Manifest;
    pub use crate::path::{Hive, HostArch, PathResolver, RegistryPath, View};
    pub use crate::plan::{ExecutionPlan, Planner};
    pub use crate::reconciler::Reconciler;
    pub use crate::report::{Outcome, OutcomeStatus, Report};
    pub use crate::types::{
        Action, ActionKind, Ensure, KeyResource, Operation, Origin, Resource, ResourceId,
        ValueData, ValueName, ValueResource,
    };
    pub use std::sync::Arc;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
