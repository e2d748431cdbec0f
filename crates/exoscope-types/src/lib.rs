//! Shared data types for Exoscope streaming ingestion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical class-label order used for confusion matrices and label-keyed
/// payload conversion.
pub const CANONICAL_LABELS: [&str; 3] = ["CANDIDATE", "CONFIRMED", "FALSE POSITIVE"];

/// Canonical classification of an observed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Confirmed,
    Candidate,
    FalsePositive,
}

impl Classification {
    /// Position of this class in [`CANONICAL_LABELS`].
    pub fn canonical_index(self) -> usize {
        match self {
            Self::Candidate => 0,
            Self::Confirmed => 1,
            Self::FalsePositive => 2,
        }
    }

    /// Canonical display label for this class.
    pub fn label(self) -> &'static str {
        CANONICAL_LABELS[self.canonical_index()]
    }

    /// Class at the given canonical index, if in range.
    pub fn from_canonical_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Candidate),
            1 => Some(Self::Confirmed),
            2 => Some(Self::FalsePositive),
            _ => None,
        }
    }
}

/// Progress record for one backend pipeline step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: u32,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

impl StepRecord {
    /// Opens a new record at `now`.
    pub fn open(step: u32, status: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            step,
            status: status.into(),
            started_at: now,
            finished_at: None,
            duration_ms: None,
        }
    }

    /// Returns true while the step has not been finalized.
    pub fn is_open(&self) -> bool {
        self.finished_at.is_none()
    }

    /// Stamps the finish time and duration. Finalized records are immutable;
    /// calling this again is a no-op.
    pub fn finalize(&mut self, now: DateTime<Utc>) {
        if self.finished_at.is_some() {
            return;
        }
        self.finished_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds());
    }
}

/// Standalone prediction for one observed object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub id: String,
    pub classification: Classification,
    /// Always clamped into `[0, 100]`.
    pub probability: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pubdate: Option<String>,
}

/// Joined before/after prediction pair for one candidate key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRecord {
    pub id: String,
    pub old_classification: Classification,
    pub old_probability: f64,
    pub new_classification: Classification,
    pub new_probability: f64,
}

/// Per-fold cross-validation metrics. Missing fields stay absent, never
/// defaulted to zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FoldMetrics {
    pub accuracy: Option<f64>,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1: Option<f64>,
}

/// Dense label-by-label count table in canonical order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub labels: Vec<String>,
    pub cells: [[u64; 3]; 3],
}

impl ConfusionMatrix {
    /// Builds a matrix over the canonical label order.
    pub fn new(cells: [[u64; 3]; 3]) -> Self {
        Self {
            labels: CANONICAL_LABELS.iter().map(|label| label.to_string()).collect(),
            cells,
        }
    }
}

impl Default for ConfusionMatrix {
    fn default() -> Self {
        Self::new([[0; 3]; 3])
    }
}

/// Aggregate metrics for one evaluation group (test or blind holdout).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub accuracy: Option<f64>,
    pub f1: Option<f64>,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub confusion: Option<ConfusionMatrix>,
}

impl EvaluationMetrics {
    /// Field-wise presence merge: a later message carrying only some fields
    /// never erases the ones it omits.
    pub fn apply(&mut self, update: EvaluationMetrics) {
        if let Some(accuracy) = update.accuracy {
            self.accuracy = Some(accuracy);
        }
        if let Some(f1) = update.f1 {
            self.f1 = Some(f1);
        }
        if let Some(precision) = update.precision {
            self.precision = Some(precision);
        }
        if let Some(recall) = update.recall {
            self.recall = Some(recall);
        }
        if let Some(confusion) = update.confusion {
            self.confusion = Some(confusion);
        }
    }
}

/// Everything known so far about a run's model metrics. Fields are merged by
/// presence: an update only overwrites what it carries.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub feature_count: Option<u64>,
    pub training_duration_ms: Option<u64>,
    pub fold_metrics: Vec<FoldMetrics>,
    pub test: Option<EvaluationMetrics>,
    pub blind: Option<EvaluationMetrics>,
}

/// Partial metrics extracted from a single message.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricsUpdate {
    pub feature_count: Option<u64>,
    pub training_duration_ms: Option<u64>,
    pub fold_metrics: Option<Vec<FoldMetrics>>,
    pub test: Option<EvaluationMetrics>,
    pub blind: Option<EvaluationMetrics>,
}

impl MetricsUpdate {
    /// Returns true when the update carries nothing.
    pub fn is_empty(&self) -> bool {
        self.feature_count.is_none()
            && self.training_duration_ms.is_none()
            && self.fold_metrics.is_none()
            && self.test.is_none()
            && self.blind.is_none()
    }
}

impl MetricsSnapshot {
    /// Merges an update into the snapshot. Absent update fields leave the
    /// existing values untouched.
    pub fn apply(&mut self, update: MetricsUpdate) {
        if let Some(feature_count) = update.feature_count {
            self.feature_count = Some(feature_count);
        }
        if let Some(training_duration_ms) = update.training_duration_ms {
            self.training_duration_ms = Some(training_duration_ms);
        }
        if let Some(fold_metrics) = update.fold_metrics {
            self.fold_metrics = fold_metrics;
        }
        if let Some(test) = update.test {
            self.test.get_or_insert_with(Default::default).apply(test);
        }
        if let Some(blind) = update.blind {
            self.blind.get_or_insert_with(Default::default).apply(blind);
        }
    }
}

/// One logical JSON document reassembled from the stream. Every field is
/// optional; unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct StreamMessage {
    pub step: Option<u32>,
    pub status: Option<String>,
    pub finished: Option<bool>,
    pub details: Option<Value>,
    pub predictions: Option<Value>,
    pub prediction: Option<Value>,
}

/// Operating mode of the host application that owns a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Classify,
    Train,
}

/// How the request's input was supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Single,
    Batch,
}

/// Request metadata carried alongside a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMeta {
    pub input_kind: InputKind,
    pub has_hyperparams: bool,
}

/// Lifecycle phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    #[default]
    Streaming,
    Completed,
    /// Stream ended with a non-empty, never-parsed payload accumulator; all
    /// previously merged data is kept.
    CompletedWithWarning,
    Failed,
    Cancelled,
}

impl RunPhase {
    /// Returns true when no further stream activity is expected.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Streaming)
    }
}

/// Identifier of one run inside the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub u64);

/// Scoped container for everything one submission produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub id: RunId,
    pub mode: RunMode,
    pub meta: RunMeta,
    pub phase: RunPhase,
    pub steps: Vec<StepRecord>,
    pub candidates: Vec<CandidateRecord>,
    pub comparisons: Vec<ComparisonRecord>,
    pub metrics: MetricsSnapshot,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
}

impl RunState {
    /// Creates a fresh run in the streaming phase.
    pub fn new(id: RunId, mode: RunMode, meta: RunMeta, now: DateTime<Utc>) -> Self {
        Self {
            id,
            mode,
            meta,
            phase: RunPhase::Streaming,
            steps: Vec::new(),
            candidates: Vec::new(),
            comparisons: Vec::new(),
            metrics: MetricsSnapshot::default(),
            started_at: now,
            finished_at: None,
            last_activity_at: None,
        }
    }

    /// Stamps the last-activity time.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity_at = Some(now);
    }

    /// Moves the run into a terminal phase. Already-terminal runs keep their
    /// original phase and finish time.
    pub fn finish(&mut self, phase: RunPhase, now: DateTime<Utc>) {
        if self.phase.is_terminal() {
            return;
        }
        self.phase = phase;
        self.finished_at = Some(now);
    }

    /// Currently open step record, if any.
    pub fn open_step_mut(&mut self) -> Option<&mut StepRecord> {
        self.steps.iter_mut().find(|record| record.is_open())
    }

    /// Highest step number reported so far.
    pub fn highest_step(&self) -> Option<u32> {
        self.steps.iter().map(|record| record.step).max()
    }
}
