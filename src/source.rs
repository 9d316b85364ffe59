//! Webhook source registry.
//!
//! A [`WebhookSource`] describes one sender: the shared secret its signatures
//! are verified with, the events it is expected to emit, an optional endpoint
//! for outbound deliveries, and per-source overrides for rate limiting and
//! retry behavior. The [`SourceRegistry`] stores sources and resolves inbound
//! requests to them, either by explicit id or by a User-Agent heuristic.
//!
//! Secrets never appear in log output or `Debug` formatting.

use crate::Result;
use crate::error::HookworkError;
use crate::rate_limit::RateLimit;
use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A registered webhook sender.
#[derive(Clone, Serialize, Deserialize)]
pub struct WebhookSource {
    /// Unique identifier. Also the first segment of rate-limit keys, so it
    /// must not contain `:`.
    pub id: String,
    /// Human-readable name, matched against User-Agent during resolution
    pub name: String,
    /// Shared secret for HMAC signing and verification
    pub secret: String,
    /// Endpoint for outbound deliveries to this source, if any
    pub url: Option<String>,
    /// Events this source is expected to emit; empty accepts everything
    pub allowed_events: Vec<String>,
    /// Disabled sources fail verification closed
    pub is_active: bool,
    /// Per-source rate limit override
    pub rate_limit: Option<RateLimit>,
    /// Per-source retry policy for outbound deliveries
    pub retry_policy: Option<RetryPolicy>,
    /// When this source was registered
    pub created_at: DateTime<Utc>,
}

impl WebhookSource {
    /// Create a new active source with a generated id.
    pub fn new(name: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            secret: secret.into(),
            url: None,
            allowed_events: Vec::new(),
            is_active: true,
            rate_limit: None,
            retry_policy: None,
            created_at: Utc::now(),
        }
    }

    /// Use a caller-chosen id instead of the generated one
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the endpoint for outbound deliveries
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Restrict the events this source is expected to emit
    pub fn with_allowed_events(mut self, events: Vec<String>) -> Self {
        self.allowed_events = events;
        self
    }

    /// Apply a per-source rate limit override
    pub fn with_rate_limit(mut self, limit: RateLimit) -> Self {
        self.rate_limit = Some(limit);
        self
    }

    /// Apply a per-source retry policy for outbound deliveries
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Register the source in a disabled state
    pub fn disabled(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Whether `event` is in this source's allow-list (empty accepts all).
    pub fn accepts_event(&self, event: &str) -> bool {
        self.allowed_events.is_empty() || self.allowed_events.iter().any(|e| e == event)
    }
}

impl std::fmt::Debug for WebhookSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSource")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("secret", &"<redacted>")
            .field("url", &self.url)
            .field("allowed_events", &self.allowed_events)
            .field("is_active", &self.is_active)
            .field("rate_limit", &self.rate_limit)
            .field("retry_policy", &self.retry_policy)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// In-memory registry of webhook sources.
#[derive(Debug, Default)]
pub struct SourceRegistry {
    sources: RwLock<HashMap<String, WebhookSource>>,
}

impl SourceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source, generating an id if the caller left it empty.
    ///
    /// Returns the stored source so callers learn the generated id.
    pub async fn register(&self, mut source: WebhookSource) -> Result<WebhookSource> {
        if source.name.trim().is_empty() {
            return Err(HookworkError::Source {
                message: "source name must not be empty".to_string(),
            });
        }
        if source.secret.is_empty() {
            return Err(HookworkError::Source {
                message: "source secret must not be empty".to_string(),
            });
        }
        if source.id.is_empty() {
            source.id = Uuid::new_v4().to_string();
        }
        if source.id.contains(':') {
            return Err(HookworkError::Source {
                message: "source id must not contain ':'".to_string(),
            });
        }

        let mut sources = self.sources.write().await;
        if sources.contains_key(&source.id) {
            return Err(HookworkError::Source {
                message: format!("source {} is already registered", source.id),
            });
        }

        tracing::info!(
            source_id = %source.id,
            name = %source.name,
            active = source.is_active,
            "Registered webhook source"
        );
        sources.insert(source.id.clone(), source.clone());
        Ok(source)
    }

    /// Replace an existing source's configuration.
    pub async fn update(&self, source: WebhookSource) -> Result<()> {
        let mut sources = self.sources.write().await;
        match sources.get_mut(&source.id) {
            Some(existing) => {
                *existing = source;
                Ok(())
            }
            None => Err(HookworkError::SourceNotFound { id: source.id }),
        }
    }

    /// Remove a source from the registry.
    pub async fn remove(&self, source_id: &str) -> Result<()> {
        let mut sources = self.sources.write().await;
        if sources.remove(source_id).is_some() {
            tracing::info!(source_id = %source_id, "Removed webhook source");
            Ok(())
        } else {
            Err(HookworkError::SourceNotFound {
                id: source_id.to_string(),
            })
        }
    }

    /// Enable or disable a source. Disabled sources still resolve so
    /// verification can report them as disabled rather than unknown.
    pub async fn set_active(&self, source_id: &str, active: bool) -> Result<()> {
        let mut sources = self.sources.write().await;
        match sources.get_mut(source_id) {
            Some(source) => {
                source.is_active = active;
                tracing::info!(source_id = %source_id, active, "Updated webhook source state");
                Ok(())
            }
            None => Err(HookworkError::SourceNotFound {
                id: source_id.to_string(),
            }),
        }
    }

    /// Look up a source by id.
    pub async fn get(&self, source_id: &str) -> Option<WebhookSource> {
        let sources = self.sources.read().await;
        sources.get(source_id).cloned()
    }

    /// List all registered sources.
    pub async fn list(&self) -> Vec<WebhookSource> {
        let sources = self.sources.read().await;
        sources.values().cloned().collect()
    }

    /// Number of registered sources.
    pub async fn count(&self) -> usize {
        let sources = self.sources.read().await;
        sources.len()
    }

    /// Resolve an inbound request to a source.
    ///
    /// An explicit id wins; otherwise the User-Agent is matched
    /// case-insensitively against source names. Disabled sources resolve too.
    pub async fn resolve(
        &self,
        source_id: Option<&str>,
        user_agent: Option<&str>,
    ) -> Option<WebhookSource> {
        let sources = self.sources.read().await;

        if let Some(id) = source_id {
            return sources.get(id).cloned();
        }

        let user_agent = user_agent?.to_lowercase();
        sources
            .values()
            .find(|source| {
                !source.name.is_empty() && user_agent.contains(&source.name.to_lowercase())
            })
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = SourceRegistry::new();
        let source = WebhookSource::new("github", "s3cr3t").with_id("gh");

        let stored = registry.register(source).await.unwrap();
        assert_eq!(stored.id, "gh");

        let fetched = registry.get("gh").await.unwrap();
        assert_eq!(fetched.name, "github");
        assert!(fetched.is_active);
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_register_generates_id() {
        let registry = SourceRegistry::new();
        let mut source = WebhookSource::new("stripe", "whsec_123");
        source.id = String::new();

        let stored = registry.register(source).await.unwrap();
        assert!(!stored.id.is_empty());
        assert!(registry.get(&stored.id).await.is_some());
    }

    #[tokio::test]
    async fn test_register_validation() {
        let registry = SourceRegistry::new();

        let err = registry
            .register(WebhookSource::new("", "secret"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("name"));

        let err = registry
            .register(WebhookSource::new("github", ""))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("secret"));

        let err = registry
            .register(WebhookSource::new("github", "secret").with_id("a:b"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains(':'));
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate_id() {
        let registry = SourceRegistry::new();
        registry
            .register(WebhookSource::new("github", "one").with_id("gh"))
            .await
            .unwrap();

        let result = registry
            .register(WebhookSource::new("github-two", "two").with_id("gh"))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_update_and_remove() {
        let registry = SourceRegistry::new();
        let stored = registry
            .register(WebhookSource::new("github", "secret").with_id("gh"))
            .await
            .unwrap();

        let mut updated = stored.clone();
        updated.allowed_events = vec!["push".to_string()];
        registry.update(updated).await.unwrap();
        assert_eq!(
            registry.get("gh").await.unwrap().allowed_events,
            vec!["push".to_string()]
        );

        registry.remove("gh").await.unwrap();
        assert!(registry.get("gh").await.is_none());
        assert!(matches!(
            registry.remove("gh").await,
            Err(HookworkError::SourceNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_missing_source() {
        let registry = SourceRegistry::new();
        let result = registry.update(WebhookSource::new("ghost", "secret")).await;
        assert!(matches!(
            result,
            Err(HookworkError::SourceNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_set_active() {
        let registry = SourceRegistry::new();
        registry
            .register(WebhookSource::new("github", "secret").with_id("gh"))
            .await
            .unwrap();

        registry.set_active("gh", false).await.unwrap();
        assert!(!registry.get("gh").await.unwrap().is_active);

        registry.set_active("gh", true).await.unwrap();
        assert!(registry.get("gh").await.unwrap().is_active);
    }

    #[tokio::test]
    async fn test_resolve_by_id_wins_over_user_agent() {
        let registry = SourceRegistry::new();
        registry
            .register(WebhookSource::new("github", "a").with_id("gh"))
            .await
            .unwrap();
        registry
            .register(WebhookSource::new("stripe", "b").with_id("st"))
            .await
            .unwrap();

        let resolved = registry
            .resolve(Some("st"), Some("GitHub-Hookshot/1.0"))
            .await
            .unwrap();
        assert_eq!(resolved.id, "st");
    }

    #[tokio::test]
    async fn test_resolve_by_user_agent_is_case_insensitive() {
        let registry = SourceRegistry::new();
        registry
            .register(WebhookSource::new("GitHub", "secret").with_id("gh"))
            .await
            .unwrap();

        let resolved = registry
            .resolve(None, Some("github-hookshot/044aadd"))
            .await
            .unwrap();
        assert_eq!(resolved.id, "gh");
    }

    #[tokio::test]
    async fn test_resolve_disabled_source_still_resolves() {
        let registry = SourceRegistry::new();
        registry
            .register(WebhookSource::new("github", "secret").with_id("gh").disabled())
            .await
            .unwrap();

        let resolved = registry.resolve(Some("gh"), None).await.unwrap();
        assert!(!resolved.is_active);
    }

    #[tokio::test]
    async fn test_resolve_unknown() {
        let registry = SourceRegistry::new();
        assert!(registry.resolve(Some("nope"), None).await.is_none());
        assert!(registry.resolve(None, Some("curl/8.0")).await.is_none());
        assert!(registry.resolve(None, None).await.is_none());
    }

    #[test]
    fn test_accepts_event() {
        let open = WebhookSource::new("github", "secret");
        assert!(open.accepts_event("push"));

        let restricted = WebhookSource::new("github", "secret")
            .with_allowed_events(vec!["push".to_string(), "release".to_string()]);
        assert!(restricted.accepts_event("push"));
        assert!(!restricted.accepts_event("issues"));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let source = WebhookSource::new("github", "super-secret-value");
        let debug = format!("{:?}", source);
        assert!(!debug.contains("super-secret-value"));
        assert!(debug.contains("<redacted>"));
    }
}
