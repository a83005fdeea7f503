use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};
use vhostgate::assets::AssetResolver;
use vhostgate::config::Config;
use vhostgate::gateway::GatewayServer;
use vhostgate::resolver::DomainResolver;
use vhostgate::store::Database;

pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vhostgate=debug".parse().expect("valid log directive")),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path.display(), error = %e, "Failed to load configuration");
        e
    })?;

    info!(path = %config_path.display(), "Configuration loaded");

    print_startup_banner(&config);

    // Write PID file if configured (with exclusive lock on Unix)
    let pid_file_path = config.server.pid_file.as_ref().map(PathBuf::from);
    let _pid_file = if let Some(ref path) = pid_file_path {
        let pid_file = write_pid_file(path)?;
        info!(path = %path.display(), "PID file written and locked");
        Some(pid_file)
    } else {
        None
    };

    // Open the tenant binding store (read-only from the gateway's side)
    let db = Database::open(&config.hosting.database)?;

    let resolver = Arc::new(DomainResolver::new(
        db,
        &config.hosting.home_prefix,
        config.hosting.binding_cache_ttl(),
    ));
    let assets = Arc::new(AssetResolver::new(config.hosting.index_files.clone()));

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Load TLS material if configured. A configured-but-broken TLS setup
    // is fatal at startup; the gateway never silently falls back to
    // plaintext-only when HTTPS was requested.
    let tls_acceptor = if config.server.tls_enabled() {
        let cert_path = config.server.tls_cert.as_ref().expect("validated at load");
        let key_path = config.server.tls_key.as_ref().expect("validated at load");
        let certs = load_certs(cert_path)?;
        let key = load_key(key_path)?;
        info!(cert = %cert_path, key = %key_path, "TLS enabled with provided certificates");

        let tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| anyhow::anyhow!("TLS configuration error: {}", e))?;

        Some(TlsAcceptor::from(Arc::new(tls_config)))
    } else {
        None
    };

    let connection_deadline = config.server.connection_deadline();

    // Plaintext listener, always bound
    let http_addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .map_err(|e| {
            error!(bind = %config.server.bind, port = config.server.port, error = %e, "Invalid HTTP bind address");
            anyhow::anyhow!("Invalid HTTP bind address: {}", e)
        })?;

    let http_gateway = GatewayServer::new(
        http_addr,
        Arc::clone(&resolver),
        Arc::clone(&assets),
        shutdown_rx.clone(),
    )
    .with_connection_deadline(connection_deadline);

    let http_handle = tokio::spawn(async move {
        if let Err(e) = http_gateway.run().await {
            error!(error = %e, "HTTP gateway error");
        }
    });

    // TLS listener, only when certificate material is configured
    let https_port = config.server.https_port();
    let https_handle = if let Some(acceptor) = tls_acceptor {
        let https_addr: SocketAddr = format!("{}:{}", config.server.bind, https_port)
            .parse()
            .map_err(|e| {
                error!(bind = %config.server.bind, port = https_port, error = %e, "Invalid HTTPS bind address");
                anyhow::anyhow!("Invalid HTTPS bind address: {}", e)
            })?;

        let https_gateway = GatewayServer::new(
            https_addr,
            Arc::clone(&resolver),
            Arc::clone(&assets),
            shutdown_rx.clone(),
        )
        .with_tls(acceptor)
        .with_connection_deadline(connection_deadline);

        Some(tokio::spawn(async move {
            if let Err(e) = https_gateway.run().await {
                error!(error = %e, "HTTPS gateway error");
            }
        }))
    } else {
        None
    };

    // Wait for shutdown signal (Ctrl+C or SIGTERM)
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }

    // Signal shutdown
    let _ = shutdown_tx.send(true);

    // Wait for listeners to stop (with timeout)
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = http_handle.await;
        if let Some(handle) = https_handle {
            let _ = handle.await;
        }
    })
    .await;

    // Clean up PID file
    if let Some(ref path) = pid_file_path {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "Failed to remove PID file");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// PID file handle that maintains an exclusive lock
#[cfg(unix)]
struct PidFile {
    _file: std::fs::File,
}

#[cfg(unix)]
impl PidFile {
    fn create(path: &Path) -> anyhow::Result<Self> {
        use std::os::unix::io::AsRawFd;

        let file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        // Try to acquire exclusive lock (non-blocking)
        let fd = file.as_raw_fd();
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };

        if result != 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                anyhow::bail!("Another instance is already running (PID file is locked)");
            }
            return Err(err.into());
        }

        // Write PID
        let pid = std::process::id();
        use std::io::Write;
        writeln!(&file, "{}", pid)?;

        // Keep the file handle open to maintain the lock
        Ok(Self { _file: file })
    }
}

#[cfg(not(unix))]
struct PidFile;

#[cfg(not(unix))]
impl PidFile {
    fn create(path: &Path) -> anyhow::Result<Self> {
        let pid = std::process::id();
        let mut file = std::fs::File::create(path)?;
        use std::io::Write;
        writeln!(file, "{}", pid)?;
        Ok(Self)
    }
}

fn write_pid_file(path: &Path) -> anyhow::Result<PidFile> {
    PidFile::create(path)
}

fn print_startup_banner(config: &Config) {
    info!(name = PKG_NAME, version = VERSION, "Starting virtual-hosting gateway");
    let https_port = config.server.https_port();
    info!(
        bind = %config.server.bind,
        http_port = config.server.port,
        https_port = if https_port > 0 { Some(https_port) } else { None },
        tls = config.server.tls_enabled(),
        "Server configuration"
    );
    info!(
        database = %config.hosting.database,
        home_prefix = %config.hosting.home_prefix,
        index_files = ?config.hosting.index_files,
        binding_cache_ttl_secs = config.hosting.binding_cache_ttl_secs,
        "Hosting configuration"
    );
}

fn load_certs(path: &str) -> anyhow::Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| anyhow::anyhow!("Failed to open certificate file {}: {}", path, e))?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow::anyhow!("Failed to parse certificates from {}: {}", path, e))?;

    if certs.is_empty() {
        anyhow::bail!("No certificates found in {}", path);
    }

    Ok(certs)
}

fn load_key(path: &str) -> anyhow::Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| anyhow::anyhow!("Failed to open key file {}: {}", path, e))?;
    let mut reader = BufReader::new(file);

    loop {
        match rustls_pemfile::read_one(&mut reader)
            .map_err(|e| anyhow::anyhow!("Failed to parse key from {}: {}", path, e))?
        {
            Some(rustls_pemfile::Item::Pkcs1Key(key)) => return Ok(key.into()),
            Some(rustls_pemfile::Item::Pkcs8Key(key)) => return Ok(key.into()),
            Some(rustls_pemfile::Item::Sec1Key(key)) => return Ok(key.into()),
            None => break,
            _ => continue,
        }
    }

    anyhow::bail!("No private key found in {}", path)
}
