//! # Listener
//!
//! Binds the gateway's TCP socket and serves the axum application on it, over TLS when
//! a certificate/key pair is configured and in plaintext otherwise. Every listener owns a
//! [`CancellationToken`]; cancelling it stops accepting, lets in-flight requests finish
//! and then completes the serving task.

use crate::core::config::{ServerConfig, TlsConfig};
use crate::core::error::{GatewayError, GatewayResult};
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// A running listener generation
#[derive(Debug)]
pub struct ListenerHandle {
    local_addr: SocketAddr,
    tls: bool,
    shutdown: CancellationToken,
    task: JoinHandle<GatewayResult<()>>,
}

impl ListenerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    /// Ask the server to stop accepting and drain in-flight requests
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Force the serving task down without waiting for in-flight requests
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Wait for the serving task to complete
    pub fn task(&mut self) -> &mut JoinHandle<GatewayResult<()>> {
        &mut self.task
    }
}

/// A dropped handle takes its serving task down with it
impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.task.abort();
    }
}

/// Load a rustls server configuration from PEM files
pub async fn load_tls_config(tls: &TlsConfig) -> GatewayResult<Arc<rustls::ServerConfig>> {
    let cert_pem = tokio::fs::read(&tls.cert_file).await.map_err(|e| {
        GatewayError::tls(format!("reading {}: {}", tls.cert_file.display(), e))
    })?;
    let key_pem = tokio::fs::read(&tls.key_file).await.map_err(|e| {
        GatewayError::tls(format!("reading {}: {}", tls.key_file.display(), e))
    })?;

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_pem.as_slice())
        .collect::<Result<_, _>>()
        .map_err(|e| GatewayError::tls(format!("invalid certificate: {}", e)))?;
    if certs.is_empty() {
        return Err(GatewayError::tls(format!(
            "no certificates found in {}",
            tls.cert_file.display()
        )));
    }

    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut key_pem.as_slice())
        .map_err(|e| GatewayError::tls(format!("invalid private key: {}", e)))?
        .ok_or_else(|| {
            GatewayError::tls(format!("no private key found in {}", tls.key_file.display()))
        })?;

    let mut config =
        rustls::ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| GatewayError::tls(e.to_string()))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| GatewayError::tls(e.to_string()))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

/// Bind the configured address and start serving `app`
pub async fn bind(config: &ServerConfig, app: Router) -> GatewayResult<ListenerHandle> {
    let tls = match &config.tls {
        Some(tls) => Some(TlsAcceptor::from(load_tls_config(tls).await?)),
        None => None,
    };

    let bind_addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| GatewayError::internal(format!("Failed to bind {}: {}", bind_addr, e)))?;
    let local_addr = listener.local_addr()?;

    let shutdown = CancellationToken::new();
    let is_tls = tls.is_some();
    let task = match tls {
        Some(acceptor) => tokio::spawn(serve_tls(listener, acceptor, app, shutdown.clone())),
        None => tokio::spawn(serve_plain(listener, app, shutdown.clone())),
    };

    info!(address = %local_addr, tls = is_tls, "Gateway listener started");

    Ok(ListenerHandle {
        local_addr,
        tls: is_tls,
        shutdown,
        task,
    })
}

async fn serve_plain(listener: TcpListener, app: Router, shutdown: CancellationToken) -> GatewayResult<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| GatewayError::internal(format!("Gateway server error: {}", e)))?;

    debug!("Plaintext listener stopped");
    Ok(())
}

async fn serve_tls(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    app: Router,
    shutdown: CancellationToken,
) -> GatewayResult<()> {
    let connections = TaskTracker::new();

    loop {
        let (stream, remote_addr) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    continue;
                }
            },
        };

        let acceptor = acceptor.clone();
        let service = TowerToHyperService::new(app.clone());
        let shutdown = shutdown.clone();

        connections.spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(s) => s,
                Err(e) => {
                    debug!(remote = %remote_addr, error = %e, "TLS handshake failed");
                    return;
                }
            };

            let builder = auto::Builder::new(TokioExecutor::new());
            let conn = builder.serve_connection_with_upgrades(TokioIo::new(tls_stream), service);
            tokio::pin!(conn);

            let result = tokio::select! {
                result = conn.as_mut() => result,
                _ = shutdown.cancelled() => {
                    conn.as_mut().graceful_shutdown();
                    conn.as_mut().await
                }
            };
            if let Err(e) = result {
                warn!(remote = %remote_addr, error = %e, "Connection error");
            }
        });
    }

    drop(listener);
    connections.close();
    connections.wait().await;

    debug!("TLS listener stopped");
    Ok(())
}
