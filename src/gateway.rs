//! Listener management and the per-request pipeline
//!
//! One `GatewayServer` per listener; the plaintext and TLS listeners share
//! the same handler, so behavior is identical across schemes. Resolution
//! never consults the scheme.

use crate::assets::AssetResolver;
use crate::emitter;
use crate::error::{json_error_response, GatewayBody, GatewayErrorCode};
use crate::resolver::DomainResolver;
use hyper::body::Incoming;
use hyper::header::HeaderValue;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Header name for request ID
const X_REQUEST_ID: &str = "x-request-id";

/// Maximum hostname length per DNS specification
const MAX_HOSTNAME_LEN: usize = 253;

/// A single-listener HTTP/1.1 server front for the static gateway
pub struct GatewayServer {
    bind_addr: SocketAddr,
    resolver: Arc<DomainResolver>,
    assets: Arc<AssetResolver>,
    shutdown_rx: watch::Receiver<bool>,
    tls_acceptor: Option<TlsAcceptor>,
    connection_deadline: Option<Duration>,
}

impl GatewayServer {
    pub fn new(
        bind_addr: SocketAddr,
        resolver: Arc<DomainResolver>,
        assets: Arc<AssetResolver>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bind_addr,
            resolver,
            assets,
            shutdown_rx,
            tls_acceptor: None,
            connection_deadline: None,
        }
    }

    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls_acceptor = Some(acceptor);
        self
    }

    /// Bound deadline for handling one connection (slow-client shedding)
    pub fn with_connection_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.connection_deadline = deadline;
        self
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_acceptor.is_some()
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        let protocol = if self.tls_acceptor.is_some() { "HTTPS" } else { "HTTP" };
        info!(addr = %self.bind_addr, protocol, "Gateway listening (HTTP/1.1)");

        let mut shutdown_rx = self.shutdown_rx.clone();
        let tls_acceptor = self.tls_acceptor.clone();
        let connection_deadline = self.connection_deadline;

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let resolver = Arc::clone(&self.resolver);
                            let assets = Arc::clone(&self.assets);
                            let tls_acceptor = tls_acceptor.clone();

                            tokio::spawn(async move {
                                let serve = async {
                                    if let Some(acceptor) = tls_acceptor {
                                        match acceptor.accept(stream).await {
                                            Ok(tls_stream) => {
                                                if let Err(e) = handle_connection(tls_stream, addr, resolver, assets, true).await {
                                                    debug!(addr = %addr, error = %e, "TLS connection error");
                                                }
                                            }
                                            Err(e) => {
                                                debug!(addr = %addr, error = %e, "TLS handshake failed");
                                            }
                                        }
                                    } else if let Err(e) = handle_connection(stream, addr, resolver, assets, false).await {
                                        debug!(addr = %addr, error = %e, "Connection error");
                                    }
                                };

                                match connection_deadline {
                                    Some(deadline) => {
                                        if tokio::time::timeout(deadline, serve).await.is_err() {
                                            debug!(addr = %addr, deadline_secs = deadline.as_secs(), "Connection deadline elapsed");
                                        }
                                    }
                                    None => serve.await,
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Gateway shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    resolver: Arc<DomainResolver>,
    assets: Arc<AssetResolver>,
    is_tls: bool,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let resolver = Arc::clone(&resolver);
        let assets = Arc::clone(&assets);
        let client_addr = addr;
        async move { handle_request(req, resolver, assets, client_addr, is_tls).await }
    });

    // HTTP/1.1 only; HTTP/2 is out of scope for this gateway
    hyper::server::conn::http1::Builder::new()
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

async fn handle_request(
    req: Request<Incoming>,
    resolver: Arc<DomainResolver>,
    assets: Arc<AssetResolver>,
    client_addr: SocketAddr,
    is_tls: bool,
) -> Result<Response<GatewayBody>, Infallible> {
    // Generate or propagate request ID
    let request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let scheme = if is_tls { "https" } else { "http" };

    // Extract the bare domain from the Host header
    let hostname = match extract_hostname(&req) {
        Some(h) => h,
        None => {
            debug!(client = %client_addr, request_id, "Missing or invalid Host header");
            // A request this malformed does not get to reuse the connection
            let mut response = json_error_response(
                GatewayErrorCode::MalformedRequest,
                "Missing or invalid Host header",
            );
            response
                .headers_mut()
                .insert(hyper::header::CONNECTION, HeaderValue::from_static("close"));
            return Ok(response);
        }
    };

    let path = req.uri().path().to_string();
    debug!(hostname, method = %req.method(), path, scheme, request_id, "Incoming request");

    // One binding lookup per request; exact domain match, no default tenant
    let binding = match resolver.resolve(&hostname).await {
        Ok(Some(binding)) => binding,
        Ok(None) => {
            return Ok(json_error_response(
                GatewayErrorCode::UnknownDomain,
                "Unknown or unconfigured domain",
            ));
        }
        Err(e) => {
            // Log detailed error internally, return generic message externally
            error!(hostname, request_id, error = %e, "Binding store lookup failed");
            return Ok(json_error_response(
                GatewayErrorCode::StoreUnavailable,
                "Tenant lookup failed",
            ));
        }
    };

    // The access path is tenant-supplied; a root that resolves outside
    // the tenant's home tree is refused like any other miss
    let tenant_root = match resolver.tenant_root(&binding).await {
        Some(root) => root,
        None => {
            debug!(hostname, tenant = binding.tenant_name, request_id, "No servable tenant root");
            return Ok(json_error_response(
                GatewayErrorCode::AssetNotFound,
                "Not found",
            ));
        }
    };

    // Containment violations are folded into the miss case here
    let file = match assets.resolve(&tenant_root, &path).await {
        Some(file) => file,
        None => {
            debug!(hostname, path, tenant = binding.tenant_name, request_id, "No servable asset");
            return Ok(json_error_response(
                GatewayErrorCode::AssetNotFound,
                "Not found",
            ));
        }
    };

    match emitter::emit(&file).await {
        Ok(response) => {
            debug!(hostname, path, file = %file.display(), request_id, "Serving asset");
            Ok(response)
        }
        Err(e) => {
            // The file passed resolution, so this is a 500, never a 404
            error!(hostname, file = %file.display(), request_id, error = %e, "Failed to read resolved asset");
            Ok(json_error_response(
                GatewayErrorCode::FilesystemFailure,
                "Failed to read file",
            ))
        }
    }
}

fn extract_hostname<B>(req: &Request<B>) -> Option<String> {
    req.headers()
        .get(hyper::header::HOST)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| {
            // Strip port if present; bindings are stored as bare domains
            let hostname = h.split(':').next()?;

            if hostname.is_empty() {
                return None;
            }

            // Validate length (DNS max is 253 characters)
            if hostname.len() > MAX_HOSTNAME_LEN {
                return None;
            }

            // Validate characters: alphanumeric, hyphen, and dot only.
            // This prevents log injection and other attacks
            if !hostname
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
            {
                return None;
            }

            Some(hostname.to_lowercase())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_host(host: &str) -> Request<()> {
        Request::builder()
            .uri("/")
            .header(hyper::header::HOST, host)
            .body(())
            .unwrap()
    }

    #[test]
    fn test_extract_hostname_strips_port() {
        let req = request_with_host("example.com:8080");
        assert_eq!(extract_hostname(&req), Some("example.com".to_string()));
    }

    #[test]
    fn test_extract_hostname_lowercases() {
        let req = request_with_host("Example.COM");
        assert_eq!(extract_hostname(&req), Some("example.com".to_string()));
    }

    #[test]
    fn test_extract_hostname_missing_header() {
        let req = Request::builder().uri("/").body(()).unwrap();
        assert_eq!(extract_hostname(&req), None);
    }

    #[test]
    fn test_extract_hostname_rejects_invalid_characters() {
        let req = request_with_host("exa mple.com");
        assert_eq!(extract_hostname(&req), None);

        let req = request_with_host("example.com/evil");
        assert_eq!(extract_hostname(&req), None);
    }

    #[test]
    fn test_extract_hostname_rejects_overlong() {
        let long = format!("{}.com", "a".repeat(260));
        let req = request_with_host(&long);
        assert_eq!(extract_hostname(&req), None);
    }

    #[test]
    fn test_extract_hostname_rejects_empty() {
        let req = request_with_host(":8080");
        assert_eq!(extract_hostname(&req), None);
    }
}
