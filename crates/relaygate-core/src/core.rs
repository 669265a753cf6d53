use std::sync::Arc;

use axum::Router;
use axum::routing::{MethodRouter, any, delete, post};

use crate::auth::AuthProvider;
use crate::handler::{
    fallback_handler, not_found_handler, not_implemented_handler, relay_handler,
};
use crate::relay::RelayEngine;

const RELAY_PATHS: &[&str] = &[
    "/v1/chat/completions",
    "/v1/completions",
    "/v1/embeddings",
    "/v1/engines/{model}/embeddings",
    "/v1/moderations",
    "/v1/images/generations",
    "/v1/edits",
];

const NOT_IMPLEMENTED_PATHS: &[&str] = &[
    "/v1/audio/{*rest}",
    "/v1/files",
    "/v1/files/{*rest}",
    "/v1/fine-tunes",
    "/v1/fine-tunes/{*rest}",
];

pub struct CoreState {
    pub engine: Arc<RelayEngine>,
    pub auth: Arc<dyn AuthProvider>,
}

pub struct Core {
    state: Arc<CoreState>,
}

impl Core {
    pub fn new(engine: Arc<RelayEngine>, auth: Arc<dyn AuthProvider>) -> Self {
        Self {
            state: Arc::new(CoreState { engine, auth }),
        }
    }

    pub fn router(&self) -> Router {
        let mut router = Router::new();
        for path in RELAY_PATHS {
            router = router.route(path, relay_route());
        }
        for path in NOT_IMPLEMENTED_PATHS {
            router = router.route(path, any(not_implemented_handler));
        }
        router
            .route(
                "/v1/models/{model}",
                delete(not_implemented_handler).fallback(not_found_handler),
            )
            .fallback(fallback_handler)
            .with_state(self.state.clone())
    }

    pub fn state(&self) -> Arc<CoreState> {
        self.state.clone()
    }
}

fn relay_route() -> MethodRouter<Arc<CoreState>> {
    post(relay_handler).fallback(not_found_handler)
}
