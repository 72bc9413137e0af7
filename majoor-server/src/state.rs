//! Shared application state: every core service behind an `Arc`, plus the
//! request-guard helpers handlers call before touching anything.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::http::{HeaderMap, Method};
use majoor_config::AppConfig;
use majoor_core::{
    AssetError, CollectionStore, Database, EnrichmentQueue, Indexer,
    MaintenanceGuard, RequestContext, RootRegistry, SearchEngine,
    SecurityPolicy, SettingsStore, SidecarSync, WatcherHandle,
};
use majoor_core::security::require_operation_enabled;
use majoor_core::WriteOperation;
use serde_json::Value;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<Database>,
    pub registry: Arc<RootRegistry>,
    pub settings: Arc<SettingsStore>,
    pub security: Arc<SecurityPolicy>,
    pub indexer: Arc<Indexer>,
    pub search: Arc<SearchEngine>,
    pub maintenance: Arc<MaintenanceGuard>,
    pub enrich: Arc<EnrichmentQueue>,
    pub sidecar: Arc<SidecarSync>,
    pub collections: Arc<CollectionStore>,
    pub watcher: Arc<RwLock<Arc<dyn WatcherHandle>>>,
    pub started_at: Instant,
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl AppState {
    /// Build the security request context from request parts.
    pub fn request_context(
        &self,
        method: &Method,
        headers: &HeaderMap,
        addr: &SocketAddr,
    ) -> RequestContext {
        let bearer = header_str(headers, "authorization").and_then(|raw| {
            let lower = raw.to_ascii_lowercase();
            lower
                .starts_with("bearer ")
                .then(|| raw[7..].trim().to_string())
                .filter(|token| !token.is_empty())
        });
        RequestContext {
            method: method.as_str().to_string(),
            peer_ip: addr.ip().to_string(),
            x_forwarded_for: header_str(headers, "x-forwarded-for"),
            x_real_ip: header_str(headers, "x-real-ip"),
            x_forwarded_host: header_str(headers, "x-forwarded-host"),
            origin: header_str(headers, "origin"),
            host: header_str(headers, "host"),
            has_csrf_header: headers.contains_key("x-requested-with")
                || headers.contains_key("x-csrf-token"),
            write_token: header_str(headers, "x-mjr-token").or(bearer),
        }
    }

    /// CSRF check for state-changing requests.
    pub fn csrf_guard(&self, ctx: &RequestContext) -> Result<(), AssetError> {
        match self.security.csrf_error(ctx) {
            Some(message) => Err(AssetError::Csrf(message)),
            None => Ok(()),
        }
    }

    /// Sliding-window rate limit for one endpoint bucket.
    pub fn rate_limit(
        &self,
        ctx: &RequestContext,
        endpoint: &str,
        max_requests: usize,
        window_seconds: u64,
    ) -> Result<(), AssetError> {
        let (allowed, retry_after) =
            self.security
                .check_rate_limit(ctx, endpoint, max_requests, window_seconds);
        if allowed {
            Ok(())
        } else {
            Err(AssetError::RateLimited {
                retry_after: retry_after.unwrap_or(1),
            })
        }
    }

    /// Full guard for mutating endpoints: CSRF, then write-token auth,
    /// then the operation allowlist.
    pub async fn write_guard(
        &self,
        ctx: &RequestContext,
        op: WriteOperation,
    ) -> Result<(), AssetError> {
        self.csrf_guard(ctx)?;
        let prefs = self.settings.security_prefs().await;
        let stored_hash = self.settings.api_token_hash().await?;
        self.security
            .check_write_access(ctx, stored_hash.as_deref(), &prefs)?;
        require_operation_enabled(op, &prefs)
    }

    /// Parse a JSON request body within the configured size bound.
    pub fn parse_json_body(&self, body: &Bytes) -> Result<Value, AssetError> {
        if body.len() > self.config.security.max_json_body_bytes {
            return Err(AssetError::invalid("Request body too large"));
        }
        if body.is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        serde_json::from_slice(body)
            .map_err(|err| AssetError::InvalidJson(err.to_string()))
    }

    pub fn index_dir(&self) -> PathBuf {
        self.registry.index_dir()
    }

    /// Swap the live watcher handle (maintenance stop/restart).
    pub async fn replace_watcher(&self, watcher: Arc<dyn WatcherHandle>) {
        *self.watcher.write().await = watcher;
    }

    pub async fn watcher(&self) -> Arc<dyn WatcherHandle> {
        self.watcher.read().await.clone()
    }
}
