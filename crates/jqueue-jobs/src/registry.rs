//! Handler registry mapping job type names to async handlers.

use crate::error::{JobError, JobResult};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

/// Application error returned by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Creates a handler error with the given description.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the description.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("invalid payload: {}", err))
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<HandlerError> for JobError {
    fn from(err: HandlerError) -> Self {
        JobError::HandlerExecutionFailed(err.message)
    }
}

/// Result of one handler invocation.
pub type HandlerResult = Result<(), HandlerError>;

/// Job handler function type.
pub type Handler = Arc<dyn Fn(Value) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Registry of job handlers keyed by job type name.
///
/// Constructed once at startup and shared with the worker pool by `Arc`.
/// The lock is only held to clone a handler out, never across an await.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Handler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a handler, replacing any previous one for the same type.
    pub fn register(&self, name: impl Into<String>, handler: Handler) {
        let name = name.into();
        let replaced = self.handlers.write().insert(name.clone(), handler).is_some();
        info!(job_type = %name, replaced, "Registered job handler");
    }

    /// Installs an async closure taking the raw payload.
    pub fn register_fn<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(name, Arc::new(move |payload| handler(payload).boxed()));
    }

    /// Installs an async closure taking a typed payload.
    ///
    /// A payload that does not deserialize into `P` fails the attempt like any
    /// other handler error.
    pub fn register_typed<P, F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.register(
            name,
            Arc::new(move |payload| {
                let handler = handler.clone();
                async move {
                    let typed: P = serde_json::from_value(payload)?;
                    handler(typed).await
                }
                .boxed()
            }),
        );
    }

    /// Looks up the handler for a job type.
    pub fn resolve(&self, name: &str) -> JobResult<Handler> {
        let handler = self.handlers.read().get(name).cloned();
        handler.ok_or_else(|| {
            debug!(job_type = %name, "No handler registered");
            JobError::HandlerNotFound(name.to_string())
        })
    }

    /// Returns true if a handler is registered for the type.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.read().contains_key(name)
    }

    /// Registered type names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_register_and_resolve() {
        let registry = HandlerRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        registry.register_fn("email", move |_payload| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), HandlerError>(())
            }
        });

        let handler = registry.resolve("email").unwrap();
        handler(json!("x")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resolve_nonexistent_leaves_registry_unchanged() {
        let registry = HandlerRegistry::new();
        registry.register_fn("email", |_| async { Ok::<(), HandlerError>(()) });

        let err = registry.resolve("nonexistent").err().unwrap();
        assert!(matches!(err, JobError::HandlerNotFound(name) if name == "nonexistent"));
        assert_eq!(registry.names(), vec!["email".to_string()]);
        assert!(!registry.contains("nonexistent"));
    }

    #[tokio::test]
    async fn test_register_overwrites() {
        let registry = HandlerRegistry::new();
        registry.register_fn("email", |_| async { Err(HandlerError::new("old")) });
        registry.register_fn("email", |_| async { Ok::<(), HandlerError>(()) });

        assert_eq!(registry.len(), 1);
        assert!(registry.resolve("email").unwrap()(Value::Null).await.is_ok());
    }

    #[derive(Deserialize)]
    struct Compress {
        path: String,
    }

    #[tokio::test]
    async fn test_register_typed() {
        let registry = HandlerRegistry::new();
        registry.register_typed("compress", |payload: Compress| async move {
            if payload.path.is_empty() {
                return Err(HandlerError::new("empty path"));
            }
            Ok(())
        });

        let handler = registry.resolve("compress").unwrap();
        assert!(handler(json!({"path": "/tmp/a"})).await.is_ok());

        let err = handler(json!({"level": 3})).await.unwrap_err();
        assert!(err.message().starts_with("invalid payload"));
    }

    #[test]
    fn test_handler_error_maps_to_retryable_job_error() {
        let err: JobError = HandlerError::new("smtp timeout").into();
        assert!(err.is_retryable());
    }
}
