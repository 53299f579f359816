//! Application state shared across request handlers.

use std::sync::Arc;

use crate::engine::Engine;

/// Shared application state, passed to handlers through axum's state
/// extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    engine: Engine,
}

impl AppState {
    pub fn new(engine: Engine) -> Self {
        Self {
            inner: Arc::new(AppStateInner { engine }),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }
}
