use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

/// Counters handed to a [`ProgressSink`]. Always a consistent copy.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub total_hosts: u64,
    pub completed_hosts: u64,
    pub total_ports: u64,
    pub completed_ports: u64,
    /// Address of the host that produced this update.
    pub current_address: String,
}

/// Lifecycle of one scan run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    #[default]
    Idle,
    Enumerating,
    Running,
    Draining,
    Completed,
    Failed,
}

/// Receives progress from whichever worker reaches a completion point.
///
/// Calls are serialized; an implementation never sees two updates at once.
/// Anything that needs delivery on a particular thread must marshal it there.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, snapshot: &ProgressSnapshot);

    fn on_phase(&self, _phase: ScanPhase) {}
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressSnapshot) + Send + Sync,
{
    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        self(snapshot)
    }
}

/// Shared by every worker of a run. Mutation and emission happen under one lock.
pub(crate) struct ProgressTracker {
    snapshot: Mutex<ProgressSnapshot>,
    sink: Option<Arc<dyn ProgressSink>>,
}

impl ProgressTracker {
    pub(crate) fn new(total_hosts: u64, total_ports: u64, sink: Option<Arc<dyn ProgressSink>>) -> Self {
        Self {
            snapshot: Mutex::new(ProgressSnapshot {
                total_hosts,
                total_ports,
                ..ProgressSnapshot::default()
            }),
            sink,
        }
    }

    pub(crate) fn port_completed(&self, address: &str) {
        self.update(address, |s| s.completed_ports += 1);
    }

    pub(crate) fn host_completed(&self, address: &str) {
        self.update(address, |s| s.completed_hosts += 1);
    }

    pub(crate) fn phase(&self, phase: ScanPhase) {
        if let Some(sink) = &self.sink {
            let _guard = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
            sink.on_phase(phase);
        }
    }

    pub(crate) fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update(&self, address: &str, bump: impl FnOnce(&mut ProgressSnapshot)) {
        let mut guard = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        bump(&mut guard);
        guard.current_address.clear();
        guard.current_address.push_str(address);
        if let Some(sink) = &self.sink {
            sink.on_progress(&guard);
        }
    }
}
