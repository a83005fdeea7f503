use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Global configuration for the gateway
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Virtual-hosting settings
    #[serde(default)]
    pub hosting: HostingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// HTTP port (default: 80)
    #[serde(default = "default_listen_port")]
    pub port: u16,

    /// HTTPS port (default: 443 when TLS is configured)
    pub tls_port: Option<u16>,

    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Path to TLS certificate file (PEM format)
    pub tls_cert: Option<String>,

    /// Path to TLS private key file (PEM format)
    pub tls_key: Option<String>,

    /// Path to PID file (optional)
    pub pid_file: Option<String>,

    /// Per-connection deadline in seconds (0 disables, default: 30)
    #[serde(default = "default_connection_deadline")]
    pub connection_deadline_secs: u64,
}

impl ServerConfig {
    /// TLS is active only when both a certificate and a key are configured
    pub fn tls_enabled(&self) -> bool {
        self.tls_cert.is_some() && self.tls_key.is_some()
    }

    /// Get HTTPS port (0 means disabled)
    pub fn https_port(&self) -> u16 {
        if !self.tls_enabled() {
            return 0;
        }
        self.tls_port.unwrap_or(443)
    }

    /// Per-connection deadline, if one is configured
    pub fn connection_deadline(&self) -> Option<Duration> {
        if self.connection_deadline_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.connection_deadline_secs))
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_listen_port(),
            tls_port: None,
            bind: default_bind_address(),
            tls_cert: None,
            tls_key: None,
            pid_file: None,
            connection_deadline_secs: default_connection_deadline(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HostingConfig {
    /// Path to the SQLite database holding tenant bindings
    #[serde(default = "default_database_path")]
    pub database: String,

    /// Prefix under which tenant home directories live
    #[serde(default = "default_home_prefix")]
    pub home_prefix: String,

    /// Ordered index-file fallback chain for directory requests
    #[serde(default = "default_index_files")]
    pub index_files: Vec<String>,

    /// Binding cache TTL in seconds (0 disables caching, default: 0)
    #[serde(default)]
    pub binding_cache_ttl_secs: u64,
}

impl HostingConfig {
    /// Binding cache TTL, if caching is enabled
    pub fn binding_cache_ttl(&self) -> Option<Duration> {
        if self.binding_cache_ttl_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.binding_cache_ttl_secs))
        }
    }
}

impl Default for HostingConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
            home_prefix: default_home_prefix(),
            index_files: default_index_files(),
            binding_cache_ttl_secs: 0,
        }
    }
}

fn default_listen_port() -> u16 {
    80
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_connection_deadline() -> u64 {
    30 // 30 seconds before an idle or slow connection is shed
}

fn default_database_path() -> String {
    "./panel.db".to_string()
}

fn default_home_prefix() -> String {
    "/home".to_string()
}

fn default_index_files() -> Vec<String> {
    vec!["index.html".to_string(), "index.htm".to_string()]
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.tls_cert.is_some() != self.server.tls_key.is_some() {
            anyhow::bail!("tls_cert and tls_key must be configured together");
        }

        if self.hosting.index_files.is_empty() {
            anyhow::bail!("hosting.index_files must name at least one candidate");
        }

        for candidate in &self.hosting.index_files {
            if candidate.contains('/') || candidate.contains('\\') {
                anyhow::bail!(
                    "hosting.index_files entry '{}' must be a bare file name",
                    candidate
                );
            }
        }

        Ok(())
    }
}
