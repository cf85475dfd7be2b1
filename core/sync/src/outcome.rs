//! Per-record outcomes and run reports.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crmsync_common::RecordId;

/// Result of syncing one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// A new destination record was created.
    Created { id: String },
    /// An existing destination record was updated.
    Updated { id: String },
    /// The record has no value for the unique field.
    SkippedNoUniqueValue,
    /// The destination refused the creation.
    FailedCreate { status: u16, body: String },
    /// The destination refused the update.
    FailedUpdate { id: String, status: u16, body: String },
    /// The record could not be read, reconciled or written.
    FailedFetch { error: String },
}

impl SyncOutcome {
    /// Outcome kind, without payload.
    pub fn kind(&self) -> OutcomeKind {
        match self {
            SyncOutcome::Created { .. } => OutcomeKind::Created,
            SyncOutcome::Updated { .. } => OutcomeKind::Updated,
            SyncOutcome::SkippedNoUniqueValue => OutcomeKind::SkippedNoUniqueValue,
            SyncOutcome::FailedCreate { .. } => OutcomeKind::FailedCreate,
            SyncOutcome::FailedUpdate { .. } => OutcomeKind::FailedUpdate,
            SyncOutcome::FailedFetch { .. } => OutcomeKind::FailedFetch,
        }
    }

    /// Whether the record reached the destination.
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Created { .. } | SyncOutcome::Updated { .. })
    }

    /// Whether the record failed.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            SyncOutcome::FailedCreate { .. }
                | SyncOutcome::FailedUpdate { .. }
                | SyncOutcome::FailedFetch { .. }
        )
    }
}

/// Kind of a [`SyncOutcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Created,
    Updated,
    SkippedNoUniqueValue,
    FailedCreate,
    FailedUpdate,
    FailedFetch,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutcomeKind::Created => "created",
            OutcomeKind::Updated => "updated",
            OutcomeKind::SkippedNoUniqueValue => "skipped_no_unique_value",
            OutcomeKind::FailedCreate => "failed_create",
            OutcomeKind::FailedUpdate => "failed_update",
            OutcomeKind::FailedFetch => "failed_fetch",
        };
        f.write_str(s)
    }
}

/// Outcome of one record, with the context needed to trace it.
#[derive(Debug, Clone, Serialize)]
pub struct RecordOutcome {
    /// Source record id. `None` when the listing itself failed.
    pub record_id: Option<RecordId>,
    /// Value of the unique field, when resolved.
    pub unique_value: Option<String>,
    #[serde(flatten)]
    pub outcome: SyncOutcome,
}

/// Outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed_create: usize,
    pub failed_update: usize,
    pub failed_fetch: usize,
}

impl OutcomeCounts {
    /// Count one outcome.
    pub fn record(&mut self, kind: OutcomeKind) {
        match kind {
            OutcomeKind::Created => self.created += 1,
            OutcomeKind::Updated => self.updated += 1,
            OutcomeKind::SkippedNoUniqueValue => self.skipped += 1,
            OutcomeKind::FailedCreate => self.failed_create += 1,
            OutcomeKind::FailedUpdate => self.failed_update += 1,
            OutcomeKind::FailedFetch => self.failed_fetch += 1,
        }
    }

    /// Add another set of counts.
    pub fn merge(&mut self, other: &OutcomeCounts) {
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.failed_create += other.failed_create;
        self.failed_update += other.failed_update;
        self.failed_fetch += other.failed_fetch;
    }

    /// Total number of outcomes.
    pub fn total(&self) -> usize {
        self.created
            + self.updated
            + self.skipped
            + self.failed_create
            + self.failed_update
            + self.failed_fetch
    }

    /// Number of failed outcomes.
    pub fn failed(&self) -> usize {
        self.failed_create + self.failed_update + self.failed_fetch
    }
}

impl fmt::Display for OutcomeCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} skipped, {} failed",
            self.created,
            self.updated,
            self.skipped,
            self.failed()
        )
    }
}

/// Report for one object type.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectReport {
    pub object_type: String,
    pub destination_object: String,
    pub records: Vec<RecordOutcome>,
    #[serde(serialize_with = "serialize_millis")]
    pub duration: Duration,
}

impl ObjectReport {
    pub(crate) fn new(object_type: &str, destination_object: &str) -> Self {
        Self {
            object_type: object_type.to_string(),
            destination_object: destination_object.to_string(),
            records: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    /// Outcome counts of this object type.
    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for record in &self.records {
            counts.record(record.outcome.kind());
        }
        counts
    }
}

/// Report for a whole run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub objects: Vec<ObjectReport>,
    #[serde(serialize_with = "serialize_millis")]
    pub duration: Duration,
}

impl SyncReport {
    /// Every outcome, tagged with its object type, in processing order.
    pub fn outcomes(&self) -> impl Iterator<Item = (&str, &RecordOutcome)> {
        self.objects.iter().flat_map(|object| {
            object
                .records
                .iter()
                .map(move |record| (object.object_type.as_str(), record))
        })
    }

    /// Report of one object type.
    pub fn object(&self, object_type: &str) -> Option<&ObjectReport> {
        self.objects.iter().find(|o| o.object_type == object_type)
    }

    /// Counts across all object types.
    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for object in &self.objects {
            counts.merge(&object.counts());
        }
        counts
    }

    /// Whether any record failed.
    pub fn has_failures(&self) -> bool {
        self.counts().failed() > 0
    }
}

fn serialize_millis<S: serde::Serializer>(
    duration: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}
