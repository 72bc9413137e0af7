//! CSRF protection, rate limiting, and write authorization.
//!
//! These checks run at the top of every mutating handler. They never panic
//! and fail open only where blocking would break the UI for a bug on our
//! side (client identification), never where it would widen access.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Instant;

use constant_time_eq::constant_time_eq;
use ipnetwork::IpNetwork;
use majoor_config::env::env_bool;
use majoor_config::SecurityConfig;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::{AssetError, Result};
use crate::settings::{hash_api_token, SecurityPrefs};

const OVERFLOW_CLIENT_ID: &str = "__overflow__";

/// Request facts the security layer needs, extracted once per request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub method: String,
    pub peer_ip: String,
    pub x_forwarded_for: Option<String>,
    pub x_real_ip: Option<String>,
    pub x_forwarded_host: Option<String>,
    pub origin: Option<String>,
    pub host: Option<String>,
    /// X-Requested-With or X-CSRF-Token present.
    pub has_csrf_header: bool,
    /// Token from X-MJR-Token or `Authorization: Bearer`.
    pub write_token: Option<String>,
}

/// Destructive or state-changing operations gated by explicit opt-ins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOperation {
    Write,
    Delete,
    Rename,
    OpenInFolder,
    ResetIndex,
}

impl WriteOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteOperation::Write => "write",
            WriteOperation::Delete => "delete",
            WriteOperation::Rename => "rename",
            WriteOperation::OpenInFolder => "open_in_folder",
            WriteOperation::ResetIndex => "reset_index",
        }
    }
}

/// Gate an operation on the effective security preferences.
///
/// Delete/rename/open-in-folder/reset-index are always opt-in, even with
/// Safe Mode off. Plain writes (rating/tags) pass when Safe Mode is off or
/// `allow_write` is set.
pub fn require_operation_enabled(
    op: WriteOperation,
    prefs: &SecurityPrefs,
) -> Result<()> {
    let denied = |hint: &str| {
        Err(AssetError::Forbidden(format!(
            "{} is disabled by default. {hint}",
            op.as_str()
        )))
    };
    match op {
        WriteOperation::ResetIndex => {
            if prefs.allow_reset_index {
                Ok(())
            } else {
                denied("Enable 'allow_reset_index' or set MAJOOR_ALLOW_RESET_INDEX=1.")
            }
        }
        WriteOperation::Delete => {
            if prefs.allow_delete {
                Ok(())
            } else {
                denied("Set MAJOOR_ALLOW_DELETE=1 to enable asset deletion.")
            }
        }
        WriteOperation::Rename => {
            if prefs.allow_rename {
                Ok(())
            } else {
                denied("Set MAJOOR_ALLOW_RENAME=1 to enable asset renaming.")
            }
        }
        WriteOperation::OpenInFolder => {
            if prefs.allow_open_in_folder {
                Ok(())
            } else {
                denied("Set MAJOOR_ALLOW_OPEN_IN_FOLDER=1 to enable it.")
            }
        }
        WriteOperation::Write => {
            if !prefs.safe_mode || prefs.allow_write {
                Ok(())
            } else {
                Err(AssetError::Forbidden(
                    "Write operations are disabled in Safe Mode. Set \
                     MAJOOR_SAFE_MODE=0 or MAJOOR_ALLOW_WRITE=1."
                        .to_string(),
                ))
            }
        }
    }
}

fn parse_ip(value: &str) -> Option<IpAddr> {
    value.trim().parse::<IpAddr>().ok()
}

pub fn is_loopback_ip(value: &str) -> bool {
    parse_ip(value).map(|ip| ip.is_loopback()).unwrap_or(false)
}

/// Split `host[:port]`, handling bracketed IPv6 literals.
fn split_host_port(value: &str) -> (String, Option<u16>) {
    let trimmed = value.trim();
    if let Some(stripped) = trimmed.strip_prefix('[') {
        if let Some(end) = stripped.find(']') {
            let host = stripped[..end].to_string();
            let port = stripped[end + 1..]
                .strip_prefix(':')
                .and_then(|p| p.parse().ok());
            return (host, port);
        }
    }
    match trimmed.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            (host.to_string(), port.parse().ok())
        }
        _ => (trimmed.to_string(), None),
    }
}

/// Extract the netloc from an Origin value; `None` when unparsable.
fn origin_netloc(origin: &str) -> Option<String> {
    let rest = origin.split_once("://").map(|(_, rest)| rest)?;
    if rest.is_empty() {
        return None;
    }
    let netloc = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    if netloc.is_empty() {
        None
    } else {
        Some(netloc.to_string())
    }
}

fn is_loopback_alias(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

#[derive(Debug, Default)]
struct ClientState {
    endpoints: HashMap<String, Vec<Instant>>,
    touch: u64,
}

#[derive(Debug, Default)]
struct LimiterState {
    clients: HashMap<String, ClientState>,
    touch_counter: u64,
    cleanup_counter: u64,
}

/// Per-client sliding-window rate limiter with an LRU-capped client map.
///
/// When the map is full, unknown clients share one overflow bucket instead
/// of churning real entries; a spoofed-IP flood then rate-limits itself.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<LimiterState>,
    max_clients: usize,
    cleanup_interval: u64,
    min_window_s: u64,
}

impl RateLimiter {
    pub fn new(cfg: &SecurityConfig) -> Self {
        RateLimiter {
            state: Mutex::new(LimiterState::default()),
            max_clients: cfg.rate_limit_max_clients,
            cleanup_interval: cfg.rate_limit_cleanup_interval,
            min_window_s: cfg.rate_limit_min_window_s,
        }
    }

    /// Returns `(allowed, retry_after_seconds)`.
    pub fn check(
        &self,
        client_id: &str,
        endpoint: &str,
        max_requests: usize,
        window_seconds: u64,
    ) -> (bool, Option<u64>) {
        let now = Instant::now();
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(_) => return (true, None),
        };

        state.cleanup_counter += 1;
        if state.cleanup_counter >= self.cleanup_interval {
            state.cleanup_counter = 0;
            let horizon = window_seconds.max(self.min_window_s);
            Self::cleanup(&mut state, now, horizon);
        }

        state.touch_counter += 1;
        let touch = state.touch_counter;

        let key = if state.clients.contains_key(client_id) {
            client_id.to_string()
        } else if state.clients.len() >= self.max_clients {
            OVERFLOW_CLIENT_ID.to_string()
        } else {
            Self::evict_if_needed(&mut state, self.max_clients);
            client_id.to_string()
        };

        let client = state.clients.entry(key).or_default();
        client.touch = touch;
        let timestamps = client.endpoints.entry(endpoint.to_string()).or_default();
        timestamps
            .retain(|at| now.duration_since(*at).as_secs_f64() < window_seconds as f64);

        if timestamps.len() >= max_requests {
            let oldest = timestamps.first().copied().unwrap_or(now);
            let elapsed = now.duration_since(oldest).as_secs_f64();
            let retry = (window_seconds as f64 - elapsed).ceil() as i64 + 1;
            return (false, Some(retry.max(1) as u64));
        }
        timestamps.push(now);
        (true, None)
    }

    fn evict_if_needed(state: &mut LimiterState, max_clients: usize) {
        let target = (max_clients * 9) / 10;
        while state.clients.len() > target {
            let oldest = state
                .clients
                .iter()
                .min_by_key(|(_, client)| client.touch)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    state.clients.remove(&id);
                }
                None => break,
            }
        }
    }

    fn cleanup(state: &mut LimiterState, now: Instant, horizon_s: u64) {
        state.clients.retain(|_, client| {
            client.endpoints.retain(|_, timestamps| {
                timestamps.retain(|at| {
                    now.duration_since(*at).as_secs_f64() < horizon_s as f64
                });
                !timestamps.is_empty()
            });
            !client.endpoints.is_empty()
        });
    }

    #[cfg(test)]
    fn client_count(&self) -> usize {
        self.state.lock().map(|s| s.clients.len()).unwrap_or(0)
    }
}

/// Security policy resolved once at startup: trusted proxies, client
/// identity, CSRF, write auth.
#[derive(Debug)]
pub struct SecurityPolicy {
    cfg: SecurityConfig,
    trusted: Vec<IpNetwork>,
    limiter: RateLimiter,
}

impl SecurityPolicy {
    pub fn new(cfg: SecurityConfig) -> Self {
        let trusted = Self::parse_trusted(&cfg);
        let limiter = RateLimiter::new(&cfg);
        SecurityPolicy {
            cfg,
            trusted,
            limiter,
        }
    }

    /// Parse the trusted-proxy list; `/0` networks are refused unless the
    /// explicit insecure override is set, because universal trust lets any
    /// peer spoof X-Forwarded-For.
    fn parse_trusted(cfg: &SecurityConfig) -> Vec<IpNetwork> {
        let mut out = Vec::new();
        for part in cfg.trusted_proxies.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let parsed = if part.contains('/') {
                part.parse::<IpNetwork>().ok()
            } else {
                part.parse::<IpAddr>().ok().map(IpNetwork::from)
            };
            let Some(net) = parsed else {
                warn!("ignoring invalid trusted proxy entry: {part}");
                continue;
            };
            if net.prefix() == 0 && !cfg.allow_insecure_trusted_proxies {
                warn!("refusing universal trusted-proxy network {net}");
                continue;
            }
            out.push(net);
        }
        out
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn is_trusted_proxy(&self, ip: &str) -> bool {
        let Some(addr) = parse_ip(ip) else {
            return false;
        };
        self.trusted.iter().any(|net| net.contains(addr))
    }

    /// Client IP, honoring X-Forwarded-For / X-Real-IP only when the peer
    /// is a trusted proxy.
    pub fn resolve_client_ip(&self, ctx: &RequestContext) -> String {
        let peer = ctx.peer_ip.trim();
        if peer.is_empty() {
            return "unknown".to_string();
        }
        if self.is_trusted_proxy(peer) {
            if let Some(forwarded) = ctx.x_forwarded_for.as_deref() {
                if let Some(first) = forwarded.split(',').next() {
                    if parse_ip(first).is_some() {
                        return first.trim().to_string();
                    }
                }
            }
            if let Some(real_ip) = ctx.x_real_ip.as_deref() {
                if parse_ip(real_ip).is_some() {
                    return real_ip.trim().to_string();
                }
            }
        }
        peer.to_string()
    }

    /// Hashed client identity for the rate limiter; raw IPs never key the
    /// map.
    pub fn client_identifier(&self, ctx: &RequestContext) -> String {
        let ip = self.resolve_client_ip(ctx);
        let digest = Sha256::digest(ip.as_bytes());
        hex::encode(digest)[..self.cfg.client_id_hash_hex_chars].to_string()
    }

    /// Returns `(allowed, retry_after_seconds)` for the resolved client.
    pub fn check_rate_limit(
        &self,
        ctx: &RequestContext,
        endpoint: &str,
        max_requests: usize,
        window_seconds: u64,
    ) -> (bool, Option<u64>) {
        let client_id = self.client_identifier(ctx);
        self.limiter
            .check(&client_id, endpoint, max_requests, window_seconds)
    }

    /// CSRF validation for state-changing methods. `None` means allowed.
    pub fn csrf_error(&self, ctx: &RequestContext) -> Option<String> {
        let method = ctx.method.to_ascii_uppercase();
        if !matches!(method.as_str(), "POST" | "PUT" | "DELETE" | "PATCH") {
            return None;
        }
        if !ctx.has_csrf_header {
            return Some(
                "Missing anti-CSRF header (X-Requested-With or X-CSRF-Token)"
                    .to_string(),
            );
        }
        let Some(origin) = ctx.origin.as_deref().map(str::trim) else {
            return None;
        };
        if origin.is_empty() {
            return None;
        }
        if origin == "null" {
            return Some("Cross-site request blocked (Origin=null)".to_string());
        }
        let Some(mut host) = ctx.host.as_deref().map(str::trim).map(String::from)
        else {
            return Some("Missing Host header".to_string());
        };
        if host.is_empty() {
            return Some("Missing Host header".to_string());
        }
        // Behind a trusted proxy, Host reflects upstream internals; the
        // browser host arrives in X-Forwarded-Host.
        if self.is_trusted_proxy(ctx.peer_ip.trim()) {
            if let Some(xf_host) = ctx.x_forwarded_host.as_deref() {
                if let Some(first) = xf_host.split(',').next() {
                    let first = first.trim();
                    if !first.is_empty() {
                        host = first.to_string();
                    }
                }
            }
        }
        let Some(netloc) = origin_netloc(origin) else {
            return Some("Cross-site request blocked (invalid Origin)".to_string());
        };
        if netloc == host {
            return None;
        }
        let (origin_host, origin_port) = split_host_port(&netloc);
        let (host_name, host_port) = split_host_port(&host);
        if is_loopback_alias(&origin_host) && is_loopback_alias(&host_name) {
            match (origin_port, host_port) {
                (Some(a), Some(b)) if a != b => {}
                _ => return None,
            }
        }
        Some(format!("Cross-site request blocked ({netloc} != {host})"))
    }

    /// Authorization guard for destructive/write endpoints.
    ///
    /// With a configured token: constant-time match required, loopback
    /// exempt unless `MAJOOR_REQUIRE_AUTH=1`. Without one: remote writes
    /// allowed unless `allow_remote_write` is off, in which case
    /// loopback-only.
    pub fn check_write_access(
        &self,
        ctx: &RequestContext,
        stored_token_hash: Option<&str>,
        prefs: &SecurityPrefs,
    ) -> Result<String> {
        let require_auth = env_bool(false, &["MAJOOR_REQUIRE_AUTH"]);
        let client_ip = self.resolve_client_ip(ctx);
        let loopback = is_loopback_ip(&client_ip);

        if let Some(stored) = stored_token_hash.filter(|h| !h.is_empty()) {
            if let Some(provided) = ctx.write_token.as_deref() {
                let provided_hash = hash_api_token(provided);
                if constant_time_eq(
                    provided_hash.as_bytes(),
                    stored.to_ascii_lowercase().as_bytes(),
                ) {
                    return Ok(client_ip);
                }
            }
            if loopback && !require_auth {
                return Ok(client_ip);
            }
            return Err(AssetError::AuthRequired(
                "Write operation blocked: missing or invalid API token. Send \
                 it via X-MJR-Token or Authorization: Bearer <token>."
                    .to_string(),
            ));
        }

        if require_auth {
            return Err(AssetError::AuthRequired(
                "Write operation blocked: MAJOOR_REQUIRE_AUTH=1 is set but no \
                 API token is configured."
                    .to_string(),
            ));
        }
        if prefs.allow_remote_write || loopback {
            return Ok(client_ip);
        }
        Err(AssetError::Forbidden(
            "Write operation blocked for non-local clients. Configure an API \
             token or set MAJOOR_ALLOW_REMOTE_WRITE=1."
                .to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> SecurityPolicy {
        SecurityPolicy::new(SecurityConfig::default())
    }

    fn post_ctx() -> RequestContext {
        RequestContext {
            method: "POST".to_string(),
            peer_ip: "127.0.0.1".to_string(),
            has_csrf_header: true,
            ..Default::default()
        }
    }

    #[test]
    fn csrf_requires_header_on_mutations() {
        let policy = policy();
        let mut ctx = post_ctx();
        ctx.has_csrf_header = false;
        assert!(policy.csrf_error(&ctx).is_some());

        ctx.method = "GET".to_string();
        assert!(policy.csrf_error(&ctx).is_none());
    }

    #[test]
    fn csrf_rejects_null_and_mismatched_origin() {
        let policy = policy();
        let mut ctx = post_ctx();
        ctx.origin = Some("null".to_string());
        assert!(policy.csrf_error(&ctx).is_some());

        ctx.origin = Some("http://evil.example".to_string());
        ctx.host = Some("localhost:8188".to_string());
        assert!(policy.csrf_error(&ctx).is_some());

        ctx.origin = Some("http://localhost:8188".to_string());
        assert!(policy.csrf_error(&ctx).is_none());
    }

    #[test]
    fn csrf_treats_loopback_aliases_as_equivalent() {
        let policy = policy();
        let mut ctx = post_ctx();
        ctx.origin = Some("http://127.0.0.1:8188".to_string());
        ctx.host = Some("localhost:8188".to_string());
        assert!(policy.csrf_error(&ctx).is_none());

        // Same aliases but different ports must not pass.
        ctx.origin = Some("http://127.0.0.1:9999".to_string());
        assert!(policy.csrf_error(&ctx).is_some());
    }

    #[test]
    fn xff_only_honored_from_trusted_proxy() {
        let policy = policy();
        let mut ctx = post_ctx();
        ctx.peer_ip = "127.0.0.1".to_string();
        ctx.x_forwarded_for = Some("203.0.113.9".to_string());
        assert_eq!(policy.resolve_client_ip(&ctx), "203.0.113.9");

        ctx.peer_ip = "198.51.100.7".to_string();
        assert_eq!(policy.resolve_client_ip(&ctx), "198.51.100.7");
    }

    #[test]
    fn universal_proxy_network_is_refused() {
        let cfg = SecurityConfig {
            trusted_proxies: "0.0.0.0/0".to_string(),
            ..Default::default()
        };
        let policy = SecurityPolicy::new(cfg);
        assert!(!policy.is_trusted_proxy("203.0.113.9"));
    }

    #[test]
    fn rate_limiter_returns_retry_after() {
        let policy = policy();
        let ctx = post_ctx();
        for _ in 0..3 {
            let (allowed, _) = policy.check_rate_limit(&ctx, "ep", 3, 60);
            assert!(allowed);
        }
        let (allowed, retry) = policy.check_rate_limit(&ctx, "ep", 3, 60);
        assert!(!allowed);
        assert!(retry.unwrap() >= 1);
    }

    #[test]
    fn limiter_overflow_shares_bucket() {
        let cfg = SecurityConfig {
            rate_limit_max_clients: 10,
            ..Default::default()
        };
        let limiter = RateLimiter::new(&cfg);
        for i in 0..50 {
            limiter.check(&format!("client-{i}"), "ep", 100, 60);
        }
        // Bounded at the cap plus the shared overflow bucket.
        assert!(limiter.client_count() <= 11);
    }

    #[test]
    fn write_access_token_policy() {
        let policy = policy();
        let prefs = SecurityPrefs {
            safe_mode: false,
            allow_write: true,
            allow_remote_write: true,
            allow_delete: true,
            allow_rename: true,
            allow_open_in_folder: true,
            allow_reset_index: true,
        };
        let stored = hash_api_token("secret-token");

        let mut ctx = post_ctx();
        ctx.peer_ip = "198.51.100.7".to_string();
        ctx.write_token = Some("secret-token".to_string());
        assert!(policy
            .check_write_access(&ctx, Some(&stored), &prefs)
            .is_ok());

        ctx.write_token = Some("wrong".to_string());
        assert!(matches!(
            policy.check_write_access(&ctx, Some(&stored), &prefs),
            Err(AssetError::AuthRequired(_))
        ));

        // Loopback is exempt from token auth by default.
        ctx.peer_ip = "127.0.0.1".to_string();
        ctx.write_token = None;
        assert!(policy
            .check_write_access(&ctx, Some(&stored), &prefs)
            .is_ok());
    }

    #[test]
    fn write_access_remote_policy_without_token() {
        let policy = policy();
        let mut prefs = SecurityPrefs {
            safe_mode: false,
            allow_write: true,
            allow_remote_write: false,
            allow_delete: true,
            allow_rename: true,
            allow_open_in_folder: true,
            allow_reset_index: true,
        };
        let mut ctx = post_ctx();
        ctx.peer_ip = "198.51.100.7".to_string();
        assert!(matches!(
            policy.check_write_access(&ctx, None, &prefs),
            Err(AssetError::Forbidden(_))
        ));

        prefs.allow_remote_write = true;
        assert!(policy.check_write_access(&ctx, None, &prefs).is_ok());
    }

    #[test]
    fn operation_gates() {
        let prefs = SecurityPrefs {
            safe_mode: true,
            allow_write: false,
            allow_remote_write: true,
            allow_delete: false,
            allow_rename: false,
            allow_open_in_folder: false,
            allow_reset_index: false,
        };
        assert!(require_operation_enabled(WriteOperation::Write, &prefs).is_err());
        assert!(require_operation_enabled(WriteOperation::Delete, &prefs).is_err());

        let open = SecurityPrefs {
            safe_mode: false,
            allow_write: false,
            allow_remote_write: true,
            allow_delete: false,
            allow_rename: false,
            allow_open_in_folder: false,
            allow_reset_index: false,
        };
        // Safe Mode off lets plain writes through, but delete stays opt-in.
        assert!(require_operation_enabled(WriteOperation::Write, &open).is_ok());
        assert!(require_operation_enabled(WriteOperation::Delete, &open).is_err());
    }
}
