//! HTTP server setup and connection handling.

use super::router;
use faasmem_core::Manager;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Configuration for the API server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Get the socket address.
    pub fn socket_addr(&self) -> SocketAddr {
        let host: std::net::IpAddr = self.host.parse().unwrap_or([0, 0, 0, 0].into());
        SocketAddr::new(host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7070,
        }
    }
}

/// HTTP API server.
pub struct ApiServer {
    config: ServerConfig,
    manager: Arc<Manager>,
}

impl ApiServer {
    pub fn new(config: ServerConfig, manager: Arc<Manager>) -> Self {
        Self { config, manager }
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// Connections already accepted keep being served by their own tasks.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.socket_addr()).await?;
        tracing::info!(
            host = %self.config.host,
            port = %self.config.port,
            "API server started"
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, remote_addr) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!(error = %e, "cannot accept connection");
                            continue;
                        }
                    };

                    let io = TokioIo::new(stream);
                    let manager = Arc::clone(&self.manager);

                    tokio::spawn(async move {
                        let service = service_fn(move |req| {
                            let manager = Arc::clone(&manager);
                            async move { router::route(req, manager).await }
                        });

                        if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                            if !e.is_incomplete_message() {
                                tracing::warn!(
                                    remote = %remote_addr,
                                    error = %e,
                                    "HTTP connection error"
                                );
                            }
                        }
                    });
                }
                _ = &mut shutdown => {
                    tracing::info!("API server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 7070);
    }

    #[test]
    fn server_config_socket_addr() {
        let config = ServerConfig::new("127.0.0.1", 9000);
        let addr = config.socket_addr();

        assert_eq!(addr.port(), 9000);
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
    }
}
