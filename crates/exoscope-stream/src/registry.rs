//! Keyed run arena: one `RunState` per submission, with an active-run index
//! per operating mode and explicit cancellation channels.

use std::collections::HashMap;

use chrono::Utc;
use exoscope_types::{RunId, RunMeta, RunMode, RunState};
use tokio::sync::watch;

/// Handle returned when a run starts: the registry key plus the cancellation
/// receiver to thread through the consume loop.
#[derive(Debug)]
pub struct RunHandle {
    pub id: RunId,
    pub cancel: watch::Receiver<bool>,
}

/// Arena of run state keyed by run id. Adding an operating mode requires no
/// new state slices; each mode simply gets its own entry in the active index.
#[derive(Debug, Default)]
pub struct RunRegistry {
    next_id: u64,
    runs: HashMap<RunId, RunState>,
    active: HashMap<RunMode, RunId>,
    cancellations: HashMap<RunId, watch::Sender<bool>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a fresh run for `mode`. The mode's previous run, if still
    /// streaming, is signalled to cancel; its state stays in the arena for
    /// inspection. A new submission never mutates a prior run in place.
    pub fn begin(&mut self, mode: RunMode, meta: RunMeta) -> RunHandle {
        self.next_id += 1;
        let id = RunId(self.next_id);

        if let Some(previous) = self.active.insert(mode, id) {
            self.cancel(previous);
        }

        let (sender, receiver) = watch::channel(false);
        self.cancellations.insert(id, sender);
        self.runs.insert(id, RunState::new(id, mode, meta, Utc::now()));
        RunHandle {
            id,
            cancel: receiver,
        }
    }

    /// Signals cancellation to the run's consumer loop. Returns false when
    /// the run is unknown or its consumer is already gone.
    pub fn cancel(&self, id: RunId) -> bool {
        match self.cancellations.get(&id) {
            Some(sender) => sender.send(true).is_ok(),
            None => false,
        }
    }

    pub fn run(&self, id: RunId) -> Option<&RunState> {
        self.runs.get(&id)
    }

    pub fn run_mut(&mut self, id: RunId) -> Option<&mut RunState> {
        self.runs.get_mut(&id)
    }

    /// Latest run started for the given mode.
    pub fn active_run(&self, mode: RunMode) -> Option<&RunState> {
        self.active.get(&mode).and_then(|id| self.runs.get(id))
    }

    /// Removes a run and its cancellation channel.
    pub fn remove(&mut self, id: RunId) -> Option<RunState> {
        self.cancellations.remove(&id);
        self.active.retain(|_, active_id| *active_id != id);
        self.runs.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}
