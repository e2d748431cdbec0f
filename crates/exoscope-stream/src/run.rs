//! The consume loop: pulls response chunks, drives framing and reassembly,
//! and applies each reassembled message to run state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use exoscope_types::{RunPhase, RunState, StreamMessage};
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::watch;

use crate::error::StreamError;
use crate::frame::{FrameSplitter, Utf8Decoder};
use crate::reassembly::PayloadReassembler;
use crate::{metrics, predictions, steps};

/// Notified with the whole run state after every applied message, so the UI
/// layer can re-read whatever it renders.
pub type RunUpdateHandler = Arc<dyn Fn(&RunState) + Send + Sync>;

/// Default silence window before the idle watchdog raises its signal.
pub const DEFAULT_IDLE_WARN_AFTER: Duration = Duration::from_secs(60);

/// Single cooperative consumer for one run's response stream. Requests the
/// next chunk only after fully processing the current one.
pub struct RunConsumer {
    splitter: FrameSplitter,
    reassembler: PayloadReassembler,
    idle_warn_after: Duration,
    on_update: Option<RunUpdateHandler>,
}

impl RunConsumer {
    pub fn new() -> Self {
        Self {
            splitter: FrameSplitter::default(),
            reassembler: PayloadReassembler::default(),
            idle_warn_after: DEFAULT_IDLE_WARN_AFTER,
            on_update: None,
        }
    }

    pub fn idle_warn_after(mut self, after: Duration) -> Self {
        self.idle_warn_after = after;
        self
    }

    pub fn on_update(mut self, handler: RunUpdateHandler) -> Self {
        self.on_update = Some(handler);
        self
    }

    /// Consumes the response body to completion, cancellation, or transport
    /// failure. The watchdog only warns; long silence is legitimate while the
    /// remote service computes. On mid-stream transport errors the run is
    /// marked failed but all previously merged state is kept.
    pub async fn consume(
        mut self,
        response: reqwest::Response,
        run: &mut RunState,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<RunPhase, StreamError> {
        let mut stream = response.bytes_stream();
        let mut decoder = Utf8Decoder::default();
        let mut cancel_open = true;
        let mut idle_warned = false;

        loop {
            let next = tokio::select! {
                biased;
                changed = cancel.changed(), if cancel_open => {
                    match changed {
                        Ok(()) if *cancel.borrow() => {
                            tracing::debug!(run_id = run.id.0, "run cancelled");
                            run.finish(RunPhase::Cancelled, Utc::now());
                            return Ok(RunPhase::Cancelled);
                        }
                        Ok(()) => continue,
                        Err(_) => {
                            cancel_open = false;
                            continue;
                        }
                    }
                }
                _ = tokio::time::sleep(self.idle_warn_after), if !idle_warned => {
                    idle_warned = true;
                    tracing::warn!(
                        run_id = run.id.0,
                        idle_ms = self.idle_warn_after.as_millis() as u64,
                        "no stream activity; remote service may still be computing"
                    );
                    continue;
                }
                next = stream.next() => next,
            };

            let Some(chunk) = next else {
                break;
            };
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(error) => {
                    run.finish(RunPhase::Failed, Utc::now());
                    return Err(StreamError::Http(error));
                }
            };
            if chunk.is_empty() {
                continue;
            }

            idle_warned = false;
            run.touch(Utc::now());

            let fragment = match decoder.decode(chunk.as_ref()) {
                Ok(fragment) => fragment,
                Err(error) => {
                    run.finish(RunPhase::Failed, Utc::now());
                    return Err(error);
                }
            };
            for frame in self.splitter.push(&fragment) {
                self.apply_frame(&frame, run);
            }
            if self.splitter.is_terminated() {
                break;
            }
        }

        if let Some(tail) = self.splitter.finish() {
            self.apply_frame(&tail, run);
        }

        let now = Utc::now();
        steps::finalize_open_steps(run, now);
        let phase = if self.reassembler.has_pending() {
            tracing::warn!(
                run_id = run.id.0,
                pending_bytes = self.reassembler.pending_bytes(),
                "stream ended with unparsed payload data; keeping previously merged state"
            );
            RunPhase::CompletedWithWarning
        } else {
            RunPhase::Completed
        };
        run.finish(phase, now);
        if let Some(handler) = self.on_update.as_ref() {
            handler(run);
        }
        Ok(phase)
    }

    fn apply_frame(&mut self, frame: &str, run: &mut RunState) {
        let Some(document) = self.reassembler.push_frame(frame) else {
            return;
        };
        let Some(message) = message_from_document(&document) else {
            tracing::debug!("discarding reassembled document with non-object shape");
            return;
        };
        apply_message(run, &message, Utc::now());
        if let Some(handler) = self.on_update.as_ref() {
            handler(run);
        }
    }
}

impl Default for RunConsumer {
    fn default() -> Self {
        Self::new()
    }
}

/// Tolerant field extraction from a reassembled document. Wrong-typed fields
/// degrade to absent instead of discarding the whole message.
fn message_from_document(document: &Value) -> Option<StreamMessage> {
    let object = document.as_object()?;
    Some(StreamMessage {
        step: object
            .get("step")
            .and_then(crate::text::coerce_number)
            .filter(|step| *step >= 0.0)
            .map(|step| step as u32),
        status: object
            .get("status")
            .and_then(Value::as_str)
            .map(str::to_string),
        finished: object.get("finished").and_then(Value::as_bool),
        details: object.get("details").cloned(),
        predictions: object.get("predictions").cloned(),
        prediction: object.get("prediction").cloned(),
    })
}

/// Applies one message to run state: step tracking, metrics merge, prediction
/// accumulation. A message is never partially applied twice; each arrives
/// here exactly once per successful reassembly.
pub fn apply_message(run: &mut RunState, message: &StreamMessage, now: DateTime<Utc>) {
    steps::track_step(run, message, now);

    if let Some(details) = &message.details {
        let update = metrics::normalize_details(details);
        if !update.is_empty() {
            run.metrics.apply(update);
        }
    }

    if message.predictions.is_some() || message.prediction.is_some() {
        let batch = predictions::merge_predictions(
            message.predictions.as_ref(),
            message.prediction.as_ref(),
        );
        run.candidates.extend(batch.candidates);
        run.comparisons.extend(batch.comparisons);
    }
}

#[cfg(test)]
mod tests {
    use super::{apply_message, message_from_document};
    use chrono::{TimeZone, Utc};
    use exoscope_types::{Classification, InputKind, RunId, RunMeta, RunMode, RunState};
    use serde_json::json;

    fn run() -> RunState {
        let meta = RunMeta {
            input_kind: InputKind::Batch,
            has_hyperparams: false,
        };
        RunState::new(RunId(7), RunMode::Train, meta, Utc.timestamp_opt(0, 0).unwrap())
    }

    #[test]
    fn message_extraction_tolerates_wrong_types() {
        let message = message_from_document(&json!({
            "step": "3",
            "status": 12,
            "finished": "yes",
            "details": {"num_features": 5}
        }))
        .expect("object documents always yield a message");

        assert_eq!(message.step, Some(3));
        assert_eq!(message.status, None);
        assert_eq!(message.finished, None);
        assert!(message.details.is_some());
    }

    #[test]
    fn non_object_documents_are_rejected() {
        assert!(message_from_document(&json!([1, 2, 3])).is_none());
        assert!(message_from_document(&json!("status")).is_none());
    }

    #[test]
    fn one_message_updates_steps_metrics_and_predictions() {
        let mut state = run();
        let message = message_from_document(&json!({
            "step": 7,
            "status": "Predicting",
            "details": {"test_metrics": {"accuracy": 0.95}},
            "predictions": [[
                {"kepoi_name": "K1", "classification": "CONFIRMED", "probability": 91.2}
            ], [
                {"kepoi_name": "K2", "classification": "FALSE POSITIVE", "probability": 4.5}
            ]]
        }))
        .expect("message should extract");

        apply_message(&mut state, &message, Utc.timestamp_opt(100, 0).unwrap());

        assert_eq!(state.steps.len(), 1);
        assert_eq!(state.candidates.len(), 2);
        assert_eq!(state.candidates[0].classification, Classification::Confirmed);
        assert_eq!(
            state.metrics.test.as_ref().and_then(|test| test.accuracy),
            Some(0.95)
        );
    }

    #[test]
    fn later_prediction_messages_append_rather_than_replace() {
        let mut state = run();
        let now = Utc.timestamp_opt(10, 0).unwrap();
        let first = message_from_document(&json!({
            "predictions": [{"id": "K1", "classification": "CANDIDATE", "probability": 50.0}]
        }))
        .expect("first message");
        let second = message_from_document(&json!({
            "predictions": [{"id": "K1", "classification": "CONFIRMED", "probability": 90.0}]
        }))
        .expect("second message");

        apply_message(&mut state, &first, now);
        apply_message(&mut state, &second, now);

        assert_eq!(state.candidates.len(), 2);
    }
}
