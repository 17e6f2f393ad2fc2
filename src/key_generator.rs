//! Key generation utilities for rate limiting.

use axum::http::{HeaderMap, Method};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::net::SocketAddr;

const KEY_PREFIX: &str = "ratelimit";
const UNKNOWN_CLIENT: &str = "unknown";

/// Strategy for deriving a client-identifying value from a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum IdentityOption {
    /// Client network address
    ClientIp,
    /// `User-Agent` header
    UserAgent,
    /// Any name we do not know how to resolve; skipped with a warning.
    Unsupported(String),
}

impl IdentityOption {
    pub fn name(&self) -> &str {
        match self {
            IdentityOption::ClientIp => "ClientIP",
            IdentityOption::UserAgent => "UserAgent",
            IdentityOption::Unsupported(name) => name,
        }
    }

    /// Prefix marking which strategy produced a key component.
    fn tag(&self) -> &'static str {
        match self {
            IdentityOption::ClientIp => "ip",
            IdentityOption::UserAgent => "ua",
            IdentityOption::Unsupported(_) => "unsupported",
        }
    }
}

impl From<String> for IdentityOption {
    fn from(name: String) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "clientip" | "client_ip" | "ip" => IdentityOption::ClientIp,
            "useragent" | "user_agent" => IdentityOption::UserAgent,
            _ => IdentityOption::Unsupported(name),
        }
    }
}

impl From<IdentityOption> for String {
    fn from(option: IdentityOption) -> Self {
        option.name().to_string()
    }
}

impl fmt::Display for IdentityOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Store key for one (route, method, identity set) counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generates rate limiting keys based on request context
#[derive(Debug, Clone, Default)]
pub struct KeyGenerator {
    trust_forwarded_headers: bool,
}

impl KeyGenerator {
    /// `trust_forwarded_headers` should only be enabled behind a proxy that
    /// overwrites `X-Forwarded-For`/`X-Real-IP`; clients can forge them otherwise.
    pub fn new(trust_forwarded_headers: bool) -> Self {
        Self {
            trust_forwarded_headers,
        }
    }

    /// Builds `ratelimit:<path>:<METHOD>:<id>[:<id>...]`. Identities come
    /// from [`KeyGenerator::resolve_identities`] already tagged (`ip=...`).
    ///
    /// Each component is escaped so that the `:` join stays unambiguous no
    /// matter what the identity values contain.
    pub fn generate_key(&self, path: &str, method: &Method, identities: &[String]) -> RateLimitKey {
        let mut key = String::from(KEY_PREFIX);
        for component in [path, method.as_str()]
            .into_iter()
            .chain(identities.iter().map(String::as_str))
        {
            key.push(':');
            key.push_str(&escape_component(component));
        }
        RateLimitKey(key)
    }

    /// Resolves identity values in configured order, skipping empty values.
    /// Falls back to the client IP so a key never loses its identity part.
    /// Every value is tagged with its strategy, so a forged `User-Agent`
    /// equal to some address never shares that address's counter.
    pub fn resolve_identities(
        &self,
        options: &[IdentityOption],
        headers: &HeaderMap,
        peer: Option<SocketAddr>,
    ) -> Vec<String> {
        let mut identities = Vec::with_capacity(options.len().max(1));
        for option in options {
            let value = match option {
                IdentityOption::ClientIp => self.client_ip(headers, peer),
                IdentityOption::UserAgent => headers
                    .get(axum::http::header::USER_AGENT)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.trim().to_string())
                    .unwrap_or_default(),
                IdentityOption::Unsupported(name) => {
                    tracing::warn!(option = %name, "unsupported identity option");
                    continue;
                }
            };
            if !value.is_empty() {
                identities.push(tagged(option, &value));
            }
        }

        if identities.is_empty() {
            identities.push(tagged(&IdentityOption::ClientIp, &self.client_ip(headers, peer)));
        }
        identities
    }

    /// Extract client IP, honouring proxy headers only when trusted
    pub fn client_ip(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        if self.trust_forwarded_headers {
            let forwarded = headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty());
            let real_ip = || {
                headers
                    .get("x-real-ip")
                    .and_then(|v| v.to_str().ok())
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
            };
            if let Some(ip) = forwarded.or_else(real_ip) {
                return ip.to_string();
            }
        }

        peer.map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
    }
}

/// Route template when the router matched one, otherwise the raw request
/// path, with any trailing slash removed.
pub fn normalize_path(matched: Option<&str>, raw_path: &str) -> String {
    let path = matched.filter(|p| !p.is_empty()).unwrap_or(raw_path);
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn tagged(option: &IdentityOption, value: &str) -> String {
    format!("{}={}", option.tag(), value)
}

fn escape_component(raw: &str) -> Cow<'_, str> {
    if raw.contains([':', '%']) {
        Cow::Owned(raw.replace('%', "%25").replace(':', "%3A"))
    } else {
        Cow::Borrowed(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> Option<SocketAddr> {
        Some("10.1.2.3:5555".parse().unwrap())
    }

    fn headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("192.168.1.1, 10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.1"));
        headers.insert("user-agent", HeaderValue::from_static("curl/8.0"));
        headers
    }

    #[test]
    fn test_key_format() {
        let generator = KeyGenerator::default();
        let key = generator.generate_key("/ping", &Method::GET, &["10.1.2.3".into()]);
        assert_eq!(key.as_str(), "ratelimit:/ping:GET:10.1.2.3");
    }

    #[test]
    fn test_key_is_deterministic() {
        let generator = KeyGenerator::default();
        let ids = vec!["a".to_string(), "b".to_string()];
        let first = generator.generate_key("/calculate", &Method::POST, &ids);
        let second = generator.generate_key("/calculate", &Method::POST, &ids);
        assert_eq!(first, second);
    }

    #[test]
    fn test_distinct_identities_distinct_keys() {
        let generator = KeyGenerator::default();
        let a = generator.generate_key("/ping", &Method::GET, &["A".into()]);
        let b = generator.generate_key("/ping", &Method::GET, &["B".into()]);
        let post = generator.generate_key("/ping", &Method::POST, &["A".into()]);
        assert_ne!(a, b);
        assert_ne!(a, post);
    }

    #[test]
    fn test_separator_in_identity_cannot_collide() {
        let generator = KeyGenerator::default();
        let joined = generator.generate_key("/ping", &Method::GET, &["a:b".into()]);
        let split = generator.generate_key("/ping", &Method::GET, &["a".into(), "b".into()]);
        assert_ne!(joined, split);
        assert_eq!(joined.as_str(), "ratelimit:/ping:GET:a%3Ab");

        let escaped = generator.generate_key("/ping", &Method::GET, &["a%3Ab".into()]);
        assert_ne!(joined, escaped);
    }

    #[test]
    fn test_ipv6_identity_escaped() {
        let generator = KeyGenerator::default();
        let key = generator.generate_key("/ping", &Method::GET, &["::1".into()]);
        assert_eq!(key.as_str(), "ratelimit:/ping:GET:%3A%3A1");
    }

    #[test]
    fn test_client_ip_ignores_forwarded_headers_by_default() {
        let generator = KeyGenerator::default();
        assert_eq!(generator.client_ip(&headers(), peer()), "10.1.2.3");
    }

    #[test]
    fn test_client_ip_trusted_forwarded_header() {
        let generator = KeyGenerator::new(true);
        assert_eq!(generator.client_ip(&headers(), peer()), "192.168.1.1");
    }

    #[test]
    fn test_client_ip_trusted_real_ip_header() {
        let generator = KeyGenerator::new(true);
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.1"));
        assert_eq!(generator.client_ip(&headers, None), "203.0.113.1");
    }

    #[test]
    fn test_client_ip_unknown() {
        let generator = KeyGenerator::default();
        assert_eq!(generator.client_ip(&HeaderMap::new(), None), "unknown");
    }

    #[test]
    fn test_resolve_identities_in_order() {
        let generator = KeyGenerator::default();
        let ids = generator.resolve_identities(
            &[IdentityOption::UserAgent, IdentityOption::ClientIp],
            &headers(),
            peer(),
        );
        assert_eq!(ids, vec!["ua=curl/8.0".to_string(), "ip=10.1.2.3".to_string()]);
    }

    #[test]
    fn test_resolve_identities_falls_back_to_ip() {
        let generator = KeyGenerator::default();
        let ids = generator.resolve_identities(&[IdentityOption::UserAgent], &HeaderMap::new(), peer());
        assert_eq!(ids, vec!["ip=10.1.2.3".to_string()]);

        let skipped = generator.resolve_identities(
            &[IdentityOption::Unsupported("ApiKey".into())],
            &HeaderMap::new(),
            peer(),
        );
        assert_eq!(skipped, vec!["ip=10.1.2.3".to_string()]);
    }

    #[test]
    fn test_user_agent_matching_an_address_gets_its_own_key() {
        let generator = KeyGenerator::default();
        let options = [IdentityOption::UserAgent];

        let fallback = generator.resolve_identities(&options, &HeaderMap::new(), peer());

        let mut forged = HeaderMap::new();
        forged.insert("user-agent", HeaderValue::from_static("10.1.2.3"));
        let other_peer = Some("9.9.9.9:4000".parse().unwrap());
        let spoofed = generator.resolve_identities(&options, &forged, other_peer);

        let victim = generator.generate_key("/ping", &Method::GET, &fallback);
        let attacker = generator.generate_key("/ping", &Method::GET, &spoofed);
        assert_ne!(victim, attacker);
        assert_eq!(victim.as_str(), "ratelimit:/ping:GET:ip=10.1.2.3");
        assert_eq!(attacker.as_str(), "ratelimit:/ping:GET:ua=10.1.2.3");
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(Some("/fake-store/products/:id"), "/fake-store/products/7"), "/fake-store/products/:id");
        assert_eq!(normalize_path(None, "/ping/"), "/ping");
        assert_eq!(normalize_path(Some(""), "/ping"), "/ping");
        assert_eq!(normalize_path(None, "/"), "/");
        assert_eq!(normalize_path(None, ""), "/");
    }

    #[test]
    fn test_identity_option_names() {
        assert_eq!(IdentityOption::from("ClientIP".to_string()), IdentityOption::ClientIp);
        assert_eq!(IdentityOption::from("user_agent".to_string()), IdentityOption::UserAgent);
        assert_eq!(
            IdentityOption::from("Cookie".to_string()),
            IdentityOption::Unsupported("Cookie".into())
        );
        assert_eq!(String::from(IdentityOption::ClientIp), "ClientIP");
    }
}
