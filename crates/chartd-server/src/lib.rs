//! chartd-server - REST facade over the chartd release manager
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/` | List releases in all namespaces |
//! | GET | `/{namespace}` | List releases in a namespace |
//! | GET | `/{namespace}/{name}` | Get a release |
//! | POST | `/` | Install a release |
//! | PUT | `/{namespace}/{name}` | Upgrade a release |
//! | DELETE | `/{namespace}/{name}` | Uninstall a release |

pub mod dto;
pub mod error;
pub mod handlers;

use axum::Router;
use axum::routing::get;
use chartd_kube::{ActionContextFactory, ReleaseOrchestrator};
use chartd_repo::RepoSettings;
use std::sync::Arc;

/// Immutable configuration shared by every request
#[derive(Clone)]
pub struct AppState {
    pub factory: Arc<dyn ActionContextFactory>,
    pub settings: Arc<RepoSettings>,
    pub orchestrator: ReleaseOrchestrator,
    /// Fetch missing chart dependencies instead of rejecting the chart
    pub dependency_update: bool,
}

impl AppState {
    pub fn new(factory: Arc<dyn ActionContextFactory>, settings: Arc<RepoSettings>) -> Self {
        Self {
            factory,
            settings,
            orchestrator: ReleaseOrchestrator::new(),
            dependency_update: false,
        }
    }

    pub fn with_orchestrator(mut self, orchestrator: ReleaseOrchestrator) -> Self {
        self.orchestrator = orchestrator;
        self
    }

    pub fn with_dependency_update(mut self, enabled: bool) -> Self {
        self.dependency_update = enabled;
        self
    }
}

/// Build the API router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::list_all).post(handlers::install))
        .route("/{namespace}", get(handlers::list_namespace))
        .route(
            "/{namespace}/{name}",
            get(handlers::get_release)
                .put(handlers::upgrade)
                .delete(handlers::uninstall),
        )
        .with_state(state)
}
