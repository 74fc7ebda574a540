//! Single-slot in-flight handle for chat widgets.
//!
//! A widget session allows one outstanding request. Starting a new one
//! cancels whatever the slot held before.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

/// Handle for one request issued through an [`InFlightSlot`].
#[derive(Debug, Clone)]
pub struct InFlight {
    generation: u64,
    token: CancellationToken,
}

impl InFlight {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Debug, Default)]
struct SlotState {
    generation: u64,
    current: Option<CancellationToken>,
}

/// Holds the cancellation token of the current in-flight request.
#[derive(Debug, Default)]
pub struct InFlightSlot {
    state: Mutex<SlotState>,
}

impl InFlightSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the previous request, if any, and issues a handle for the
    /// next one.
    pub fn begin(&self) -> InFlight {
        let token = CancellationToken::new();
        let mut state = self.lock();
        if let Some(previous) = state.current.replace(token.clone()) {
            previous.cancel();
        }
        state.generation += 1;
        InFlight {
            generation: state.generation,
            token,
        }
    }

    /// Clears the slot if `request` is still the current one.
    pub fn finish(&self, request: &InFlight) {
        let mut state = self.lock();
        if state.generation == request.generation {
            state.current = None;
        }
    }

    /// Cancels the current request without starting another.
    pub fn abort(&self) {
        if let Some(token) = self.lock().current.take() {
            token.cancel();
        }
    }

    pub fn is_busy(&self) -> bool {
        self.lock().current.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        // The state stays consistent even if a holder panicked.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
