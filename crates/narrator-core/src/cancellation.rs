use anyhow::{Result, anyhow};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Abort flag shared between the controller and one utterance submission.
///
/// Every submission gets a fresh token tagged with a generation number.
/// Backends copy the token into each event they emit, so the controller can
/// drop events that belong to an aborted or superseded submission.
#[derive(Clone, Debug, Default)]
pub struct AbortToken {
    generation: u64,
    aborted: Arc<AtomicBool>,
}

impl AbortToken {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            aborted: Arc::default(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    pub fn ensure_live(&self, stage: &'static str) -> Result<()> {
        if self.is_aborted() {
            return Err(anyhow!(
                "submission {} aborted at stage={stage}",
                self.generation
            ));
        }
        Ok(())
    }
}
