//! Domain resolution against the tenant binding store
//!
//! One store lookup per request by default. An optional TTL cache can be
//! enabled for bursty traffic; it caches misses as well as hits, so a
//! deleted binding is served for at most one TTL, and it single-flights
//! concurrent lookups for the same domain.

use crate::store::{Database, TenantBinding};
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("binding store query failed: {0}")]
    Store(anyhow::Error),
}

struct CacheEntry {
    binding: Option<TenantBinding>,
    fetched_at: Instant,
}

/// Maps a bare domain to its tenant binding and computes the tenant root
pub struct DomainResolver {
    db: Database,
    home_prefix: PathBuf,
    cache_ttl: Option<Duration>,
    cache: DashMap<String, CacheEntry>,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl DomainResolver {
    pub fn new(db: Database, home_prefix: impl Into<PathBuf>, cache_ttl: Option<Duration>) -> Self {
        Self {
            db,
            home_prefix: home_prefix.into(),
            cache_ttl,
            cache: DashMap::new(),
            in_flight: DashMap::new(),
        }
    }

    /// Look up the binding for a bare domain (port already stripped).
    /// Exact match only; `None` means no binding exists.
    pub async fn resolve(&self, domain: &str) -> Result<Option<TenantBinding>, ResolveError> {
        let Some(ttl) = self.cache_ttl else {
            return self.query(domain).await;
        };

        if let Some(entry) = self.cache.get(domain) {
            if entry.fetched_at.elapsed() < ttl {
                return Ok(entry.binding.clone());
            }
        }

        // Single-flight: one store query per domain under a stampede.
        // The entry guard is dropped before awaiting the lock.
        let gate = {
            let entry = self
                .in_flight
                .entry(domain.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())));
            Arc::clone(entry.value())
        };
        let guard = gate.lock().await;

        // A concurrent holder may have refreshed the entry while we waited
        if let Some(entry) = self.cache.get(domain) {
            if entry.fetched_at.elapsed() < ttl {
                return Ok(entry.binding.clone());
            }
        }

        let binding = self.query(domain).await?;
        self.cache.insert(
            domain.to_string(),
            CacheEntry {
                binding: binding.clone(),
                fetched_at: Instant::now(),
            },
        );

        drop(guard);
        self.in_flight.remove(domain);

        Ok(binding)
    }

    async fn query(&self, domain: &str) -> Result<Option<TenantBinding>, ResolveError> {
        let db = self.db.clone();
        let domain = domain.to_string();

        debug!(domain, "Querying tenant binding store");

        // The store is synchronous SQLite; keep it off the reactor threads
        // so a slow query never stalls unrelated requests.
        tokio::task::spawn_blocking(move || db.lookup_binding(&domain))
            .await
            .map_err(|e| ResolveError::Store(anyhow::anyhow!("lookup task panicked: {e}")))?
            .map_err(ResolveError::Store)
    }

    /// The canonical filesystem directory served for this binding: the
    /// fixed home prefix, the tenant name, and the tenant's access path
    /// beneath it. The access path is tenant-supplied, so the joined
    /// directory must itself resolve inside the tenant's home tree; an
    /// access path symlinked elsewhere would otherwise become the sandbox
    /// boundary. `None` covers both a missing root and an escaping one.
    pub async fn tenant_root(&self, binding: &TenantBinding) -> Option<PathBuf> {
        let home = self.home_prefix.join(&binding.tenant_name);
        let canonical_home = tokio::fs::canonicalize(&home).await.ok()?;

        let root = home.join(binding.access_path.trim_start_matches('/'));
        let canonical_root = tokio::fs::canonicalize(&root).await.ok()?;

        if !canonical_root.starts_with(&canonical_home) {
            warn!(
                tenant = binding.tenant_name,
                access_path = binding.access_path,
                resolved = %canonical_root.display(),
                "Access path resolved outside tenant home tree"
            );
            return None;
        }

        Some(canonical_root)
    }
}
