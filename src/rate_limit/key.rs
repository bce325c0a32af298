use super::context::RequestContext;
use std::fmt;
use std::sync::Arc;

/// Custom full-key generator
pub type KeyGenerator = Arc<dyn Fn(&RequestContext) -> String + Send + Sync>;

/// Key prefix used when none is configured
pub const DEFAULT_PREFIX: &str = "ratelimit";

/// Derives the quota bucket a request counts against.
///
/// Keys have the form `prefix:scope:identity`, where `scope` is the custom key
/// fragment or the route identifier and `identity` is the caller. A configured
/// generator replaces everything after the prefix.
#[derive(Clone)]
pub struct KeyResolver {
    prefix: String,
    generator: Option<KeyGenerator>,
}

impl KeyResolver {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            generator: None,
        }
    }

    pub fn with_generator(mut self, generator: KeyGenerator) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Resolve the key for a request
    pub fn resolve(&self, ctx: &RequestContext, fragment: Option<&str>) -> String {
        if let Some(generator) = &self.generator {
            let generated = generator(ctx);
            if !generated.is_empty() {
                return format!("{}:{}", self.prefix, generated);
            }
        }

        let scope = fragment.unwrap_or_else(|| ctx.route_identifier());
        format!("{}:{}:{}", self.prefix, scope, ctx.caller_identity())
    }
}

impl Default for KeyResolver {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl fmt::Debug for KeyResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyResolver")
            .field("prefix", &self.prefix)
            .field("generator", &self.generator.is_some())
            .finish()
    }
}
