//! MCP server builder.
//!
//! Builds and runs the MCP server over the configured transport with
//! graceful shutdown, and attaches the artifact read routes:
//!
//! - network transports (HTTP/SSE) serve the read routes on the same
//!   listener, beside `/mcp`;
//! - stdio spawns a dedicated listener for them, so artifact URLs stay
//!   fetchable when the MCP side has no network port.
//!
//! # Example
//!
//! ```ignore
//! McpServerBuilder::new(handler)
//!     .with_transport(Transport::stdio())
//!     .with_file_routes(storage::read_router(store), config.port)
//!     .run()
//!     .await?;
//! ```

use crate::transport::Transport;
use rmcp::{ServerHandler, ServiceExt};
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors that can occur when running an MCP server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the specified port
    #[error("Failed to bind to port {port}: {message}")]
    BindFailed {
        /// The port that could not be bound
        port: u16,
        /// Error message describing the failure
        message: String,
    },

    /// Transport error during communication
    #[error("Transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The artifact read router plus the port used when no network transport
/// carries it.
pub struct FileRoutes {
    /// Router serving `GET /read/file/{*path}`
    pub router: axum::Router,
    /// Listener port for stdio mode
    pub port: u16,
}

/// Builder for configuring and running the MCP server.
pub struct McpServerBuilder<H> {
    handler: H,
    transport: Transport,
    file_routes: Option<FileRoutes>,
    shutdown_rx: Option<oneshot::Receiver<()>>,
}

impl<H> McpServerBuilder<H>
where
    H: ServerHandler + Clone + Send + Sync + 'static,
{
    /// Create a new server builder with the given handler.
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            transport: Transport::default(),
            file_routes: None,
            shutdown_rx: None,
        }
    }

    /// Set the transport mode for the server.
    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    /// Attach the artifact read routes.
    ///
    /// `port` is used only when the transport itself opens no listener
    /// (stdio); network transports serve the routes beside `/mcp`.
    pub fn with_file_routes(mut self, router: axum::Router, port: u16) -> Self {
        self.file_routes = Some(FileRoutes { router, port });
        self
    }

    /// Set a shutdown signal receiver for graceful shutdown.
    ///
    /// When the sender is dropped or a message is sent, the server will
    /// initiate graceful shutdown.
    pub fn with_shutdown(mut self, shutdown_rx: oneshot::Receiver<()>) -> Self {
        self.shutdown_rx = Some(shutdown_rx);
        self
    }

    /// Run the MCP server with the configured transport.
    ///
    /// Blocks until the server is shut down via signal or shutdown channel.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!(transport = %self.transport, "Starting MCP server");

        match self.transport {
            Transport::Stdio => self.run_stdio().await,
            Transport::Http { port } => self.run_http(port).await,
            Transport::Sse { port } => self.run_sse(port).await,
        }
    }

    /// Run the server with stdio transport.
    ///
    /// The artifact read routes, if configured, get their own listener.
    async fn run_stdio(self) -> Result<(), ServerError> {
        use rmcp::transport::io::stdio;

        let file_server = self
            .file_routes
            .map(|routes| tokio::spawn(serve_file_routes(routes)));

        let transport = stdio();

        let shutdown_future = async {
            if let Some(rx) = self.shutdown_rx {
                let _ = rx.await;
            } else {
                wait_for_shutdown_signal().await;
            }
        };

        let service = self
            .handler
            .serve(transport)
            .await
            .map_err(|e| ServerError::Transport(e.to_string()))?;

        let result = tokio::select! {
            result = service.waiting() => {
                result.map(|_| ()).map_err(|e| ServerError::Transport(e.to_string()))
            }
            _ = shutdown_future => {
                tracing::info!("Received shutdown signal, stopping server");
                Ok(())
            }
        };

        if let Some(task) = file_server {
            task.abort();
        }
        result
    }

    /// Run the server with HTTP streamable transport.
    async fn run_http(self, port: u16) -> Result<(), ServerError> {
        use rmcp::transport::streamable_http_server::{
            StreamableHttpService, session::local::LocalSessionManager,
        };

        let handler = self.handler.clone();
        let service = StreamableHttpService::new(
            move || Ok(handler.clone()),
            LocalSessionManager::default().into(),
            Default::default(),
        );

        let mut router = axum::Router::new().nest_service("/mcp", service);
        if let Some(routes) = self.file_routes {
            router = router.merge(routes.router);
        }

        let bind_addr = format!("0.0.0.0:{}", port);
        let tcp_listener =
            tokio::net::TcpListener::bind(&bind_addr)
                .await
                .map_err(|e| ServerError::BindFailed {
                    port,
                    message: e.to_string(),
                })?;

        tracing::info!(port, "HTTP server listening");

        let shutdown_future = async {
            if let Some(rx) = self.shutdown_rx {
                let _ = rx.await;
            } else {
                wait_for_shutdown_signal().await;
            }
        };

        axum::serve(tcp_listener, router)
            .with_graceful_shutdown(shutdown_future)
            .await
            .map_err(|e| ServerError::Transport(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Run the server with SSE transport.
    ///
    /// SSE shares the streamable HTTP server infrastructure.
    async fn run_sse(self, port: u16) -> Result<(), ServerError> {
        self.run_http(port).await
    }
}

/// Serve the artifact read routes on their own listener.
async fn serve_file_routes(routes: FileRoutes) {
    let bind_addr = format!("0.0.0.0:{}", routes.port);
    match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => {
            tracing::info!(port = routes.port, "Artifact file server listening");
            if let Err(e) = axum::serve(listener, routes.router).await {
                tracing::error!(error = %e, "Artifact file server stopped unexpectedly");
            }
        }
        Err(e) => {
            tracing::error!(port = routes.port, error = %e, "Failed to bind artifact file server");
        }
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
        let mut sigint =
            signal(SignalKind::interrupt()).expect("Failed to register SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to register Ctrl+C handler");
        tracing::info!("Received Ctrl+C");
    }
}

/// Set up graceful shutdown handling.
///
/// Returns a sender that can be used to trigger shutdown programmatically,
/// and a receiver to pass to the server builder.
pub fn shutdown_channel() -> (oneshot::Sender<()>, oneshot::Receiver<()>) {
    oneshot::channel()
}
