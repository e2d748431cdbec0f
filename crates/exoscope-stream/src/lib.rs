//! Streaming ingestion and reassembly engine for the Exoscope dashboard.
//!
//! Consumes one long-lived HTTP response per run, reconstructs JSON messages
//! split at arbitrary byte boundaries across chunks and frames, and merges
//! progress, metrics, and prediction payloads into typed run state. Each
//! stage advances only when its upstream yields a new unit, so state updates
//! can never outrun processing capacity.

mod client;
mod error;
mod frame;
mod metrics;
mod predictions;
mod reassembly;
mod registry;
mod run;
mod steps;
mod text;

pub use client::{ServiceClient, ServiceConfig, TrainRequest};
pub use error::StreamError;
pub use frame::{FrameSplitter, Utf8Decoder};
pub use metrics::{confusion_from_labelled, normalize_details};
pub use predictions::{classify_label, merge_predictions, PredictionBatch};
pub use reassembly::{PayloadReassembler, MAX_PENDING_PAYLOAD_BYTES};
pub use registry::{RunHandle, RunRegistry};
pub use run::{apply_message, RunConsumer, RunUpdateHandler, DEFAULT_IDLE_WARN_AFTER};
pub use steps::{finalize_open_steps, is_completion_status, track_step};
