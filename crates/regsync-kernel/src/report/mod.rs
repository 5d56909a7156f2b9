//! Run report
//!
//! One [`Outcome`] per plan node. The text form prints one line per change
//! (`Registry_key[...].ensure: created`), failures and skips marked with
//! [`ERROR_MARKER`], and a closing summary line.

use crate::error::ActionError;
use crate::plan::PlanNode;
use crate::types::{ActionKind, Operation, Origin, ResourceId, ValueData};
use serde::{Serialize, Serializer};
use std::fmt::Write as _;
use uuid::Uuid;

/// Prefix of every FAILED or SKIPPED line
pub const ERROR_MARKER: &str = "err:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Changed,
    Unchanged,
    Failed,
    Skipped,
}

/// Result of one plan node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub id: ResourceId,
    /// `None` for resources that were already in sync
    pub kind: Option<ActionKind>,
    pub origin: Origin,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ValueData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<ValueData>,
    /// Set value overwrote existing data, even data that could not be decoded
    #[serde(skip)]
    pub replaced: bool,
    #[serde(serialize_with = "error_message", skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionError>,
}

fn error_message<S: Serializer>(
    error: &Option<ActionError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.collect_str(e),
        None => serializer.serialize_none(),
    }
}

impl Outcome {
    #[must_use]
    pub fn for_node(node: &PlanNode, status: OutcomeStatus, error: Option<ActionError>) -> Self {
        let operation = node.step.operation();
        let (data, previous, replaced) = match operation {
            Some(Operation::SetValue {
                data,
                previous,
                replaces,
            }) => (Some(data.clone()), previous.clone(), *replaces || previous.is_some()),
            _ => (None, None, false),
        };
        Self {
            id: node.id.clone(),
            kind: operation.map(Operation::kind),
            origin: node.origin,
            status,
            data,
            previous,
            replaced,
            error,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self.status, OutcomeStatus::Failed | OutcomeStatus::Skipped)
    }

    /// Report line; `None` for unchanged outcomes outside verbose mode
    #[must_use]
    pub fn line(&self, verbose: bool) -> Option<String> {
        match self.status {
            OutcomeStatus::Changed => {
                let change = match self.kind {
                    Some(ActionKind::SetValue) if self.replaced => "data: changed",
                    Some(kind) if kind.is_deletion() => "ensure: removed",
                    _ => "ensure: created",
                };
                let label = match self.origin {
                    Origin::Purge => self.id.unmanaged_label(),
                    Origin::Managed => self.id.to_string(),
                };
                Some(format!("{label}.{change}"))
            }
            OutcomeStatus::Unchanged => verbose.then(|| format!("{}.ensure: unchanged", self.id)),
            OutcomeStatus::Failed | OutcomeStatus::Skipped => {
                let reason = self
                    .error
                    .as_ref()
                    .map_or_else(|| "failed".to_string(), ToString::to_string);
                Some(format!("{ERROR_MARKER} {}: {reason}", self.id))
            }
        }
    }
}

/// Status counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub changed: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Outcomes of a run, in plan order
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub run_id: Uuid,
    pub outcomes: Vec<Outcome>,
}

impl Report {
    #[must_use]
    pub fn new(run_id: Uuid, outcomes: Vec<Outcome>) -> Self {
        Self { run_id, outcomes }
    }

    #[must_use]
    pub fn summary(&self) -> Summary {
        let mut summary = Summary::default();
        for outcome in &self.outcomes {
            match outcome.status {
                OutcomeStatus::Changed => summary.changed += 1,
                OutcomeStatus::Unchanged => summary.unchanged += 1,
                OutcomeStatus::Failed => summary.failed += 1,
                OutcomeStatus::Skipped => summary.skipped += 1,
            }
        }
        summary
    }

    /// FAILED and SKIPPED outcomes
    pub fn failures(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter().filter(|outcome| outcome.is_failure())
    }

    pub fn changes(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == OutcomeStatus::Changed)
    }

    #[must_use]
    pub fn outcome(&self, id: &ResourceId) -> Option<&Outcome> {
        self.outcomes.iter().find(|outcome| outcome.id == *id)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    /// 0 when nothing failed or was skipped, 1 otherwise
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    #[must_use]
    pub fn render_text(&self, verbose: bool) -> String {
        let mut out = String::new();
        for line in self.outcomes.iter().filter_map(|outcome| outcome.line(verbose)) {
            let _ = writeln!(out, "{line}");
        }
        let s = self.summary();
        let _ = writeln!(
            out,
            "run {}: {} changed, {} unchanged, {} failed, {} skipped",
            self.run_id, s.changed, s.unchanged, s.failed, s.skipped
        );
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        #[derive(Serialize)]
        struct Document<'a> {
            #[serde(flatten)]
            report: &'a Report,
            summary: Summary,
        }
        serde_json::to_string_pretty(&Document {
            report: self,
            summary: self.summary(),
        })
    }
}
