//! Shared, swappable acceleration structure.
//!
//! Readers take an `Arc` snapshot and keep using it for a whole frame. A
//! rebuild constructs a complete structure off the lock and only then swaps
//! it in, so a frame never mixes block ranges from two builds.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};
use volray_core::Result;
use volray_volume::AccelerationStructure;

#[derive(Debug)]
struct Published {
    generation: u64,
    accel: Arc<AccelerationStructure>,
}

/// Handle to the currently published acceleration structure.
#[derive(Clone, Debug)]
pub struct AccelHandle {
    inner: Arc<RwLock<Published>>,
}

impl AccelHandle {
    /// Publish an initial structure.
    pub fn new(accel: AccelerationStructure) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Published {
                generation: 0,
                accel: Arc::new(accel),
            })),
        }
    }

    /// The current structure.
    pub fn snapshot(&self) -> Arc<AccelerationStructure> {
        Arc::clone(&self.inner.read().accel)
    }

    /// Number of structures published after the initial one.
    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    /// Swap in a new structure and return the previous one.
    pub fn publish(&self, accel: AccelerationStructure) -> Arc<AccelerationStructure> {
        let accel = Arc::new(accel);
        let mut published = self.inner.write();
        published.generation += 1;
        info!(
            "Published acceleration structure #{} ({}x{}x{} blocks)",
            published.generation,
            accel.counts().x,
            accel.counts().y,
            accel.counts().z
        );
        std::mem::replace(&mut published.accel, accel)
    }

    /// Build a replacement and publish it. On error the current structure
    /// stays published.
    pub fn rebuild(&self, build: impl FnOnce() -> Result<AccelerationStructure>) -> Result<()> {
        match build() {
            Ok(accel) => {
                self.publish(accel);
                Ok(())
            }
            Err(e) => {
                warn!("Acceleration rebuild failed, keeping previous structure: {e}");
                Err(e)
            }
        }
    }
}
