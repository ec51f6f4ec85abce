//! Cancellation by supersession.
//!
//! Every load begins by taking a [`LoadToken`] from a [`SequenceGate`].
//! Starting a newer load advances the gate, which silently invalidates every
//! older token. Loaders check their token at each suspension point and
//! abandon work once it is stale. Nothing is aborted mid-call; a stale
//! result is simply never published.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;

/// Returned when a newer load has taken over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Load {sequence} superseded by load {current}")]
pub struct Superseded {
    pub sequence: u64,
    pub current: u64,
}

/// Monotonic sequence shared by all loads of one loader
#[derive(Debug, Clone, Default)]
pub struct SequenceGate {
    counter: Arc<AtomicU64>,
}

impl SequenceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new load, invalidating every outstanding token
    pub fn begin(&self) -> LoadToken {
        let sequence = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        LoadToken {
            counter: Arc::clone(&self.counter),
            sequence,
        }
    }

    /// Invalidate outstanding tokens without starting a load
    pub fn cancel_all(&self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

/// Token held by one in-flight load
#[derive(Debug, Clone)]
pub struct LoadToken {
    counter: Arc<AtomicU64>,
    sequence: u64,
}

impl LoadToken {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn is_current(&self) -> bool {
        self.counter.load(Ordering::SeqCst) == self.sequence
    }

    /// `Err` once a newer load has started
    pub fn ensure_current(&self) -> Result<(), Superseded> {
        let current = self.counter.load(Ordering::SeqCst);
        if current == self.sequence {
            Ok(())
        } else {
            Err(Superseded {
                sequence: self.sequence,
                current,
            })
        }
    }
}
