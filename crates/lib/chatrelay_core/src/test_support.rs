//! Log capture for tests that assert on emitted events.

use std::sync::{Arc, Mutex};

use tracing::subscriber::DefaultGuard;
use tracing::{Event, Subscriber};
use tracing_subscriber::Registry;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// Targets of the events emitted on the current thread while installed.
#[derive(Clone, Default)]
pub(crate) struct CapturedEvents(Arc<Mutex<Vec<String>>>);

impl CapturedEvents {
    /// Captures events until the returned guard is dropped.
    pub(crate) fn install() -> (Self, DefaultGuard) {
        let events = Self::default();
        let subscriber = Registry::default().with(events.clone());
        (events, tracing::subscriber::set_default(subscriber))
    }

    pub(crate) fn count(&self, target: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|t| *t == target).count()
    }

    pub(crate) fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

impl<S: Subscriber> Layer<S> for CapturedEvents {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        self.0
            .lock()
            .unwrap()
            .push(event.metadata().target().to_string());
    }
}
