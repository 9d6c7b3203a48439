//! Shared application state for the server.

use std::sync::Arc;

use markup::conversation::Engine;
use markup::io::agent::GenerationAgent;
use markup::io::chat::{ChatClient, ChatEvent};
use markup::io::git_host::GitHost;
use markup::io::run_store::{RunChange, RunStore};
use tokio::sync::broadcast;

/// Receives parsed chat events. Handling happens off the request path.
pub trait EventSink: Send + Sync {
    fn dispatch(&self, event: ChatEvent);
}

impl<A, G, C> EventSink for Engine<A, G, C>
where
    A: GenerationAgent + 'static,
    G: GitHost + 'static,
    C: ChatClient + 'static,
{
    fn dispatch(&self, event: ChatEvent) {
        self.spawn_event(event);
    }
}

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RunStore>,
    pub events: Arc<dyn EventSink>,
    /// Sender the store publishes run changes on; SSE clients subscribe here.
    pub changes: broadcast::Sender<RunChange>,
}

impl AppState {
    pub fn new(
        store: Arc<RunStore>,
        events: Arc<dyn EventSink>,
        changes: broadcast::Sender<RunChange>,
    ) -> Self {
        Self {
            store,
            events,
            changes,
        }
    }
}
