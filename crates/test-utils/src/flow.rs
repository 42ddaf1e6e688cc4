use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use harbor::dispatch::{FlowControl, ProxyRequest};

/// Counts pause/resume calls so tests can assert the dispatcher's
/// exactly-once resume contract.
#[derive(Debug, Clone, Default)]
pub struct FlowProbe {
    pauses: Arc<AtomicUsize>,
    resumes: Arc<AtomicUsize>,
}

impl FlowProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pauses(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }

    pub fn resumes(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }

    /// A request whose valve reports into this probe.
    pub fn request(&self) -> ProxyRequest {
        ProxyRequest::new(Box::new(RecordingFlow {
            probe: self.clone(),
        }))
    }
}

struct RecordingFlow {
    probe: FlowProbe,
}

impl FlowControl for RecordingFlow {
    fn pause(&mut self) {
        self.probe.pauses.fetch_add(1, Ordering::SeqCst);
    }

    fn resume(&mut self) {
        self.probe.resumes.fetch_add(1, Ordering::SeqCst);
    }
}
