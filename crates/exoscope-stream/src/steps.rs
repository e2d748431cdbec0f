//! Step progress tracking: timestamps step start/finish from step-number
//! transitions and free-text completion hints.

use chrono::{DateTime, Utc};
use exoscope_types::{RunState, StepRecord, StreamMessage};

use crate::text::fold_for_match;

/// Fixed completion vocabulary, matched case- and accent-insensitively as
/// substrings of the status text.
const COMPLETION_KEYWORDS: [&str; 8] = [
    "completed",
    "complete",
    "finished",
    "done",
    "finalizado",
    "completado",
    "terminado",
    "concluido",
];

/// Returns true when free-text status signals that the current step is done.
pub fn is_completion_status(status: &str) -> bool {
    let folded = fold_for_match(status);
    COMPLETION_KEYWORDS
        .iter()
        .any(|keyword| folded.contains(keyword))
}

/// Applies one message's step, status, and finished fields to the run.
///
/// A step number strictly below the current maximum is ignored entirely;
/// observed backend behavior never produces one and nothing should be
/// finalized or reopened on its account.
pub fn track_step(run: &mut RunState, message: &StreamMessage, now: DateTime<Utc>) {
    if let Some(step) = message.step {
        match run.highest_step() {
            Some(highest) if step < highest => {
                tracing::debug!(step, highest, "ignoring step report below current maximum");
                return;
            }
            Some(highest) if step == highest => {
                if let Some(record) = run.open_step_mut() {
                    if let Some(status) = message.status.as_deref() {
                        record.status = status.to_string();
                    }
                }
            }
            _ => {
                if let Some(previous) = run.open_step_mut() {
                    previous.finalize(now);
                }
                let status = message.status.clone().unwrap_or_default();
                run.steps.push(StepRecord::open(step, status, now));
            }
        }
    }

    let finished = message.finished.unwrap_or(false)
        || message
            .status
            .as_deref()
            .is_some_and(is_completion_status);
    if finished {
        if let Some(record) = run.open_step_mut() {
            record.finalize(now);
        }
    }
}

/// Finalizes any still-open record with the end-of-stream timestamp.
pub fn finalize_open_steps(run: &mut RunState, now: DateTime<Utc>) {
    if let Some(record) = run.open_step_mut() {
        record.finalize(now);
    }
}

#[cfg(test)]
mod tests {
    use super::{finalize_open_steps, is_completion_status, track_step};
    use chrono::{DateTime, TimeZone, Utc};
    use exoscope_types::{InputKind, RunId, RunMeta, RunMode, RunState, StreamMessage};

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    fn run() -> RunState {
        let meta = RunMeta {
            input_kind: InputKind::Batch,
            has_hyperparams: true,
        };
        RunState::new(RunId(1), RunMode::Train, meta, at(0))
    }

    fn step_message(step: u32, status: &str) -> StreamMessage {
        StreamMessage {
            step: Some(step),
            status: Some(status.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn completion_vocabulary_matches_accent_insensitively() {
        assert!(is_completion_status("Paso 3 finalizado"));
        assert!(is_completion_status("COMPLETADO"));
        assert!(is_completion_status("Conclúido"));
        assert!(is_completion_status("training complete"));
        assert!(!is_completion_status("Validating"));
        assert!(!is_completion_status("Entrenando modelo"));
    }

    #[test]
    fn higher_step_finalizes_the_previous_one() {
        let mut run = run();
        track_step(&mut run, &step_message(1, "a"), at(10));
        track_step(&mut run, &step_message(1, "a"), at(12));
        track_step(&mut run, &step_message(2, "b"), at(15));

        assert_eq!(run.steps.len(), 2);
        let first = &run.steps[0];
        assert_eq!(first.step, 1);
        assert_eq!(first.started_at, at(10));
        assert_eq!(first.finished_at, Some(at(15)));
        assert_eq!(first.duration_ms, Some(5_000));
        assert!(run.steps[1].is_open());
    }

    #[test]
    fn repeated_report_updates_status_but_not_start_time() {
        let mut run = run();
        track_step(&mut run, &step_message(1, "loading"), at(10));
        track_step(&mut run, &step_message(1, "normalizing"), at(14));

        assert_eq!(run.steps.len(), 1);
        assert_eq!(run.steps[0].status, "normalizing");
        assert_eq!(run.steps[0].started_at, at(10));
        assert!(run.steps[0].is_open());
    }

    #[test]
    fn completion_keyword_finalizes_the_current_step() {
        let mut run = run();
        track_step(&mut run, &step_message(4, "training"), at(10));
        track_step(&mut run, &step_message(4, "Entrenamiento finalizado"), at(18));

        assert_eq!(run.steps.len(), 1);
        assert_eq!(run.steps[0].finished_at, Some(at(18)));
        assert_eq!(run.steps[0].duration_ms, Some(8_000));
    }

    #[test]
    fn finished_flag_without_step_finalizes_the_open_record() {
        let mut run = run();
        track_step(&mut run, &step_message(2, "predicting"), at(10));
        let message = StreamMessage {
            finished: Some(true),
            ..Default::default()
        };
        track_step(&mut run, &message, at(13));

        assert_eq!(run.steps[0].finished_at, Some(at(13)));
    }

    #[test]
    fn smaller_step_report_is_a_no_op() {
        let mut run = run();
        track_step(&mut run, &step_message(3, "training"), at(10));
        track_step(&mut run, &step_message(1, "loading finalizado"), at(12));

        assert_eq!(run.steps.len(), 1);
        assert_eq!(run.steps[0].step, 3);
        assert!(run.steps[0].is_open());
    }

    #[test]
    fn stream_end_finalizes_open_records() {
        let mut run = run();
        track_step(&mut run, &step_message(5, "predicting"), at(10));
        finalize_open_steps(&mut run, at(30));

        assert_eq!(run.steps[0].finished_at, Some(at(30)));
        assert_eq!(run.steps[0].duration_ms, Some(20_000));
    }
}
