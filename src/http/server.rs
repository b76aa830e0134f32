//! HTTP server implementation.

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::{error, info};

use super::{router, AppState};
use crate::error::{LimiterError, Result};

/// HTTP server exposing the limiter.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Shared handler state
    state: AppState,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        Self { addr, state }
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server stops accepting connections when `signal` resolves and
    /// returns once in-flight requests complete.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %listener.local_addr()?, "HTTP server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                LimiterError::Io(e)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{SlidingWindow, SlidingWindowLimiter};
    use crate::store::InMemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_server_stops_on_signal() {
        let store = Arc::new(InMemoryStore::new());
        let limiter = SlidingWindowLimiter::new(store.clone(), SlidingWindow::new(5, 1000).unwrap());
        let state = AppState::new(Arc::new(limiter), store, "x-user-id").unwrap();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();

        let result = HttpServer::new(addr, state)
            .serve_with_shutdown(async {})
            .await;

        tokio_test::assert_ok!(result);
    }
}
