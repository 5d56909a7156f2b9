//! Error types for the regsync kernel
//!
//! Errors are split by the phase that raises them:
//! - [`ParseError`]: malformed registry paths or resource references
//! - [`AccessError`]: failures reported by a registry backend
//! - [`PlanError`]: invalid declarations, fatal before anything is applied
//! - [`ActionError`]: failure of a single planned action, local to that action
//! - [`StateMachineError`]: illegal action state transitions
//! - [`ManifestError`]: unreadable or malformed declaration documents

use crate::state_machine::ActionState;
use crate::types::ResourceId;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type
#[derive(Debug, thiserror::Error)]
pub enum RegsyncError {
    /// Path or reference could not be parsed
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Registry backend failure
    #[error(transparent)]
    Access(#[from] AccessError),

    /// Declaration set is invalid
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// Manifest could not be loaded
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Illegal action state transition
    #[error(transparent)]
    StateMachine(#[from] StateMachineError),
}

impl RegsyncError {
    /// Errors that invalidate the whole run before execution begins
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Parse(_) | Self::Plan(_) | Self::Manifest(_))
    }
}

/// Convenience result alias
pub type Result<T, E = RegsyncError> = std::result::Result<T, E>;

/// Registry path parse errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Nothing to parse
    #[error("registry path is empty")]
    Empty,

    /// Hive name is not one of HKLM, HKCU, HKU, HKCR, HKCC
    #[error("unknown registry hive '{hive}' in '{raw}'")]
    UnknownHive { hive: String, raw: String },

    /// `32:` marker with nothing after it
    #[error("missing hive after view marker in '{0}'")]
    MissingHive(String),

    /// A separator follows the hive but no segment does
    #[error("path '{0}' is empty after the hive")]
    EmptyAfterHive(String),

    /// Value path without a value name
    #[error("value path '{0}' does not name a value")]
    MissingValueName(String),

    /// Reference is not `Registry_key[...]` or `Registry_value[...]`
    #[error("invalid resource reference '{0}'")]
    InvalidReference(String),
}

/// Registry backend errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    /// Key or value does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// Non-recursive delete of a key that still has subkeys
    #[error("key {0} has subkeys")]
    NotEmpty(String),

    /// Hive roots are fixed and cannot be created or deleted
    #[error("hive root {0} cannot be created or deleted")]
    HiveRoot(String),

    /// Stored value has a type this engine does not model
    #[error("value {location} has unsupported registry type {raw_type}")]
    InvalidData { location: String, raw_type: u32 },

    /// Operating system failure (permissions, IO)
    #[error("access to {location} failed: {message} (os error {code})")]
    Os {
        location: String,
        code: i32,
        message: String,
    },

    /// Call did not return within its bound
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Call panicked or its task was torn down
    #[error("backend call aborted: {0}")]
    Aborted(String),
}

impl AccessError {
    /// The expected "does not exist" signal, not a real failure
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Declaration errors, fatal for the whole run
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// Malformed path inside a declaration
    #[error("invalid declaration: {0}")]
    Parse(#[from] ParseError),

    /// Dependency graph has no topological order
    #[error("dependency cycle: {}", format_cycles(.cycles))]
    Cycle { cycles: Vec<Vec<ResourceId>> },

    /// A resource ensures PRESENT beneath a key that ensures ABSENT, so no
    /// execution order can satisfy both
    #[error("ambiguous order: {descendant} ensures present beneath {ancestor}, which ensures absent")]
    AmbiguousOrder {
        ancestor: ResourceId,
        descendant: ResourceId,
    },

    /// Two declarations resolve to the same identity incompatibly
    #[error("conflicting declarations for {id}: {reason}")]
    Conflict { id: ResourceId, reason: String },

    /// `depends_on` names a resource that is not declared
    #[error("{from} requires {target}, which is not declared")]
    UnknownReference { from: ResourceId, target: ResourceId },

    /// Hive roots cannot be declared
    #[error("{0} is a hive root and cannot be managed")]
    HiveRoot(ResourceId),

    /// PRESENT value without data
    #[error("{0} ensures present but declares no data")]
    MissingData(ResourceId),

    /// Planning task died before producing a plan
    #[error("planning aborted: {0}")]
    Aborted(String),
}

impl PlanError {
    /// Cycle-family errors (real cycles and unorderable declarations)
    #[inline]
    #[must_use]
    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::Cycle { .. } | Self::AmbiguousOrder { .. })
    }
}

fn format_cycles(cycles: &[Vec<ResourceId>]) -> String {
    cycles
        .iter()
        .map(|cycle| {
            cycle
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" <-> ")
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failure of one action; never escapes its own outcome
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    /// Backend refused or failed the call
    #[error(transparent)]
    Access(AccessError),

    /// Value declared present under a key that neither exists nor is declared
    #[error("owning key {0} does not exist and is not declared present")]
    OwnerKeyMissing(String),

    /// A prerequisite ended FAILED or SKIPPED
    #[error("not executed: dependency failed ({0})")]
    DependencyFailed(ResourceId),

    /// Run was cancelled before this action was scheduled
    #[error("not executed: run cancelled")]
    Cancelled,

    /// Backend call exceeded the action timeout
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Worker task panicked or was torn down
    #[error("action aborted: {0}")]
    Aborted(String),
}

impl From<AccessError> for ActionError {
    fn from(error: AccessError) -> Self {
        match error {
            AccessError::Timeout(after) => Self::Timeout(after),
            AccessError::Aborted(reason) => Self::Aborted(reason),
            other => Self::Access(other),
        }
    }
}

impl ActionError {
    /// Errors attached to SKIPPED outcomes rather than FAILED ones
    #[inline]
    #[must_use]
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::DependencyFailed(_) | Self::Cancelled)
    }
}

/// State machine errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    #[error("illegal transition {from:?} -> {to:?}")]
    IllegalTransition { from: ActionState, to: ActionState },
}

/// Manifest loading errors
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// File could not be read
    #[error("cannot read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Document is not valid manifest JSON
    #[error("malformed manifest: {0}")]
    Json(#[from] serde_json::Error),

    /// A resource entry has an invalid path or reference
    #[error("resource #{index}: {source}")]
    Resource {
        index: usize,
        #[source]
        source: ParseError,
    },
}
