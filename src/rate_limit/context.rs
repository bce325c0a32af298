use axum::extract::{ConnectInfo, MatchedPath, Request};
use http::{HeaderMap, Method};
use std::net::SocketAddr;

/// Resolved principal for the caller.
///
/// Authentication middleware inserts this into request extensions; when
/// present it replaces the client IP in rate limit keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallerIdentity(pub String);

/// Everything the guard needs to know about one inbound request
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    /// Route pattern that matched (e.g. `/users/:id`)
    pub route: Option<String>,
    /// Raw request path
    pub path: String,
    /// Client IP address as seen by the server
    pub client_ip: Option<String>,
    /// Principal set by authentication middleware
    pub principal: Option<String>,
    pub headers: HeaderMap,
}

impl RequestContext {
    /// Build a context without a request (for tests and benchmarks)
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            route: None,
            path: path.into(),
            client_ip: None,
            principal: None,
            headers: HeaderMap::new(),
        }
    }

    /// Extract the context from an axum request
    pub fn from_request(request: &Request, trust_proxy: bool) -> Self {
        let forwarded = if trust_proxy {
            forwarded_for(request.headers())
        } else {
            None
        };

        let client_ip = forwarded.or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0.ip().to_string())
        });

        Self {
            method: request.method().clone(),
            route: request
                .extensions()
                .get::<MatchedPath>()
                .map(|p| p.as_str().to_string()),
            path: request.uri().path().to_string(),
            client_ip,
            principal: request
                .extensions()
                .get::<CallerIdentity>()
                .map(|id| id.0.clone()),
            headers: request.headers().clone(),
        }
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }

    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    /// Matched route pattern, or the raw path when nothing matched
    pub fn route_identifier(&self) -> &str {
        self.route.as_deref().unwrap_or(&self.path)
    }

    /// Principal if known, otherwise the client IP
    pub fn caller_identity(&self) -> &str {
        self.principal
            .as_deref()
            .or(self.client_ip.as_deref())
            .unwrap_or("unknown")
    }
}

/// First hop of `X-Forwarded-For`
fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}
