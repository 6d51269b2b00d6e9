//! Shared application state.

use engine::Engine;
use session_store::Repository;

use crate::dashboard::Dashboards;

/// Shared application state accessible from all handlers.
pub struct AppState<R> {
    pub engine: Engine<R>,
    pub dashboards: Dashboards<R>,
}

impl<R: Repository + 'static> AppState<R> {
    pub fn new(engine: Engine<R>) -> Self {
        Self {
            dashboards: Dashboards::new(engine.clone()),
            engine,
        }
    }
}
