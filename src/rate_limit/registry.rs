//! Per-route limit configuration.
//!
//! A [`LimitRegistry`] is a side table of overrides. Scopes are route path
//! prefixes and play the role of a controller: their overrides apply to every
//! route beneath them. Route entries target a single route pattern, optionally
//! restricted to one HTTP method, and take precedence over scopes.

use super::context::RequestContext;
use super::types::{EffectiveLimit, LimitOverride};
use crate::error::{GuardError, Result};
use http::Method;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Dynamic skip predicate evaluated per request
pub type SkipPredicate = Arc<dyn Fn(&RequestContext) -> bool + Send + Sync>;

/// Scope rule as it appears in configuration files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeRule {
    /// Route path prefix (e.g. `/api/admin`)
    pub prefix: String,
    #[serde(flatten)]
    pub limits: LimitOverride,
    /// Exempt every route in the scope
    #[serde(default)]
    pub skip: bool,
}

/// Route rule as it appears in configuration files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRule {
    /// Route pattern (e.g. `/api/users/:id`)
    pub path: String,
    /// HTTP methods the rule applies to (empty means all)
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(flatten)]
    pub limits: LimitOverride,
    /// Exempt the route
    #[serde(default)]
    pub skip: bool,
}

#[derive(Debug, Clone, Default)]
struct Entry {
    limits: LimitOverride,
    skip: bool,
}

/// Side table of scope and route overrides
#[derive(Debug, Clone, Default)]
pub struct LimitRegistry {
    scopes: Vec<(String, Entry)>,
    routes: HashMap<(Option<Method>, String), Entry>,
}

impl LimitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configuration rules
    pub fn from_rules(scopes: &[ScopeRule], routes: &[RouteRule]) -> Result<Self> {
        let mut registry = Self::new();

        for rule in scopes {
            registry.insert_scope(&rule.prefix, rule.limits.clone(), rule.skip)?;
        }

        for rule in routes {
            if rule.methods.is_empty() {
                registry.insert_route(None, &rule.path, rule.limits.clone(), rule.skip)?;
                continue;
            }
            for method in &rule.methods {
                let method = parse_method(method, &rule.path)?;
                registry.insert_route(Some(method), &rule.path, rule.limits.clone(), rule.skip)?;
            }
        }

        Ok(registry)
    }

    /// Register class-level overrides for every route under `prefix`
    pub fn register_scope(&mut self, prefix: &str, limits: LimitOverride) -> Result<&mut Self> {
        self.insert_scope(prefix, limits, false)?;
        Ok(self)
    }

    /// Exempt every route under `prefix`
    pub fn skip_scope(&mut self, prefix: &str) -> Result<&mut Self> {
        self.insert_scope(prefix, LimitOverride::default(), true)?;
        Ok(self)
    }

    /// Register method-level overrides for one route pattern. `None` matches
    /// any HTTP method.
    pub fn register_route(
        &mut self,
        method: Option<Method>,
        path: &str,
        limits: LimitOverride,
    ) -> Result<&mut Self> {
        self.insert_route(method, path, limits, false)?;
        Ok(self)
    }

    /// Exempt one route pattern
    pub fn skip_route(&mut self, method: Option<Method>, path: &str) -> Result<&mut Self> {
        self.insert_route(method, path, LimitOverride::default(), true)?;
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty() && self.routes.is_empty()
    }

    fn insert_scope(&mut self, prefix: &str, limits: LimitOverride, skip: bool) -> Result<()> {
        if !prefix.starts_with('/') {
            return Err(GuardError::Config(format!(
                "Scope prefix must start with '/': {}",
                prefix
            )));
        }
        limits.validate(&format!("scope {}", prefix))?;

        let prefix = normalize_prefix(prefix);
        let entry = Entry { limits, skip };
        match self.scopes.iter_mut().find(|(p, _)| *p == prefix) {
            Some((_, existing)) => *existing = entry,
            None => self.scopes.push((prefix, entry)),
        }
        Ok(())
    }

    fn insert_route(
        &mut self,
        method: Option<Method>,
        path: &str,
        limits: LimitOverride,
        skip: bool,
    ) -> Result<()> {
        if !path.starts_with('/') {
            return Err(GuardError::Config(format!(
                "Route path must start with '/': {:?}",
                path
            )));
        }
        limits.validate(&format!("route {}", path))?;

        self.routes
            .insert((method, path.to_string()), Entry { limits, skip });
        Ok(())
    }

    /// Route entries for the request: exact method, then any method
    fn route_entries(&self, method: &Method, route: &str) -> [Option<&Entry>; 2] {
        [
            self.routes.get(&(Some(method.clone()), route.to_string())),
            self.routes.get(&(None, route.to_string())),
        ]
    }

    /// Longest scope prefix containing the route
    fn scope_entry(&self, route: &str) -> Option<&Entry> {
        self.scopes
            .iter()
            .filter(|(prefix, _)| in_scope(prefix, route))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, entry)| entry)
    }
}

/// Why a request bypassed the limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Route or scope carries a skip marker
    Marker,
    /// Dynamic predicate returned true
    Predicate,
    /// Limiting is not global and nothing is registered for the route
    Unguarded,
}

/// Outcome of configuration resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Skip(SkipReason),
    Apply(EffectiveLimit),
}

/// Merges module defaults, scope overrides and route overrides
#[derive(Clone)]
pub struct ConfigResolver {
    defaults: LimitOverride,
    registry: LimitRegistry,
    skip_if: Option<SkipPredicate>,
    global: bool,
}

impl ConfigResolver {
    /// Create a resolver; invalid module defaults are rejected here
    pub fn new(defaults: LimitOverride, registry: LimitRegistry, global: bool) -> Result<Self> {
        defaults.validate("module defaults")?;
        Ok(Self {
            defaults,
            registry,
            skip_if: None,
            global,
        })
    }

    pub fn with_skip_if(mut self, predicate: SkipPredicate) -> Self {
        self.skip_if = Some(predicate);
        self
    }

    /// Resolve the effective limit for a request
    pub fn resolve(&self, ctx: &RequestContext) -> Resolution {
        let route = ctx.route_identifier();
        let [exact, any_method] = self.registry.route_entries(&ctx.method, route);
        let scope_entry = self.registry.scope_entry(route);
        let entries = [exact, any_method, scope_entry];

        if entries.iter().flatten().any(|e| e.skip) {
            debug!("Skipping rate limit for {} {} (marker)", ctx.method, route);
            return Resolution::Skip(SkipReason::Marker);
        }

        if !self.global && entries.iter().all(Option::is_none) {
            return Resolution::Skip(SkipReason::Unguarded);
        }

        if let Some(predicate) = &self.skip_if {
            if predicate(ctx) {
                debug!("Skipping rate limit for {} {} (predicate)", ctx.method, route);
                return Resolution::Skip(SkipReason::Predicate);
            }
        }

        // Most specific first: exact method, any method, scope, module defaults
        let merged = entries
            .iter()
            .flatten()
            .fold(LimitOverride::default(), |merged, e| merged.or(&e.limits))
            .or(&self.defaults);
        Resolution::Apply(EffectiveLimit::from_override(merged))
    }
}

impl fmt::Debug for ConfigResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigResolver")
            .field("defaults", &self.defaults)
            .field("registry", &self.registry)
            .field("skip_if", &self.skip_if.is_some())
            .field("global", &self.global)
            .finish()
    }
}

fn parse_method(method: &str, path: &str) -> Result<Method> {
    let upper = method.to_uppercase();
    if !["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"].contains(&upper.as_str()) {
        return Err(GuardError::Config(format!(
            "Invalid HTTP method '{}' for route: {}",
            method, path
        )));
    }
    Method::from_bytes(upper.as_bytes())
        .map_err(|_| GuardError::Config(format!("Invalid HTTP method: {}", method)))
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Prefix match on path segment boundaries
fn in_scope(prefix: &str, route: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    match route.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
