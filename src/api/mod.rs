//! HTTP API server: the kiosk's remote command channel

pub mod health;
pub mod session;

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::actuators::{LightingController, SoundPlayer};
use crate::credential::CredentialGate;
use crate::notify::CompletionNotice;
use crate::session::SessionState;
use crate::shutdown::Shutdown;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub session: Arc<SessionState>,
    pub gate: CredentialGate,
    pub lighting: Arc<LightingController>,
    pub sound: Arc<dyn SoundPlayer>,
    /// Latest completion, from [`crate::notify::CompletionPublisher::subscribe`]
    pub completions: watch::Receiver<Option<CompletionNotice>>,
}

/// Configuration for building an API server
pub struct ApiServerBuilder {
    state: ApiState,
    bind: String,
    port: u16,
}

impl ApiServerBuilder {
    /// Create a new API server builder
    #[must_use]
    pub fn new(state: ApiState) -> Self {
        Self {
            state,
            bind: "0.0.0.0".to_string(),
            port: 5000,
        }
    }

    /// Set the bind address
    #[must_use]
    pub fn bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = bind.into();
        self
    }

    /// Set the listen port
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Build the API server
    #[must_use]
    pub fn build(self) -> ApiServer {
        ApiServer {
            state: Arc::new(self.state),
            bind: self.bind,
            port: self.port,
        }
    }
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    bind: String,
    port: u16,
}

impl ApiServer {
    /// Build the router with all routes
    #[must_use]
    pub fn router(&self) -> Router {
        Router::new()
            .merge(session::router(Arc::clone(&self.state)))
            .merge(health::status_router(Arc::clone(&self.state)))
            .merge(health::router())
            .layer(TraceLayer::new_for_http())
    }

    /// Run the API server until shutdown
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self, mut shutdown: Shutdown) -> Result<()> {
        let addr = format!("{}:{}", self.bind, self.port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            crate::Error::Config(format!("failed to bind API server on {addr}: {e}"))
        })?;

        tracing::info!(addr = %addr, "API server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.recv().await })
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        tracing::debug!("API server stopped");
        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self, shutdown: Shutdown) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}

impl std::fmt::Debug for ApiServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiServer")
            .field("bind", &self.bind)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}
