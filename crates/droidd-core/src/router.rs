//! Command router
//!
//! Maps dotted method names to handlers and turns request envelopes into
//! response envelopes. Handlers never touch transport frames; the router
//! converts every failure into a wire error with the right code.

use std::collections::HashMap;
use std::sync::Arc;

use droidd_proto::{AgentError, Envelope, Metadata, WireError};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Context handed to a handler alongside the request params
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub request_id: String,
    pub metadata: Option<Metadata>,
}

impl RequestContext {
    /// Deadline in ms derived from the advisory metadata timeout
    pub fn timeout_ms(&self) -> Option<u64> {
        self.metadata.as_ref().and_then(|m| m.timeout)
    }
}

/// A command handler bound to one method name.
///
/// `validate` runs before `handle`; a validation failure becomes an
/// INTERNAL error response carrying the reason.
#[async_trait::async_trait]
pub trait CommandHandler: Send + Sync {
    fn method(&self) -> &str;

    fn validate(&self, _params: &Value) -> Result<(), String> {
        Ok(())
    }

    async fn handle(&self, params: Value, ctx: RequestContext) -> Result<Value, AgentError>;
}

/// Dynamic method-name → handler mapping. Last writer wins on
/// re-registration; reads never block writers out of turn.
pub struct CommandRouter {
    handlers: RwLock<HashMap<String, Arc<dyn CommandHandler>>>,
}

impl Default for CommandRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRouter {
    pub fn new() -> Self {
        CommandRouter {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler under its method name
    pub async fn register(&self, handler: Arc<dyn CommandHandler>) {
        let method = handler.method().to_string();
        let replaced = self
            .handlers
            .write()
            .await
            .insert(method.clone(), handler)
            .is_some();
        if replaced {
            warn!(method, "Handler re-registered (previous replaced)");
        } else {
            debug!(method, "Handler registered");
        }
    }

    /// Remove a handler by method name; returns whether one was bound
    pub async fn unregister(&self, method: &str) -> bool {
        self.handlers.write().await.remove(method).is_some()
    }

    /// Sorted list of registered method names
    pub async fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.handlers.read().await.keys().cloned().collect();
        methods.sort();
        methods
    }

    pub async fn has_method(&self, method: &str) -> bool {
        self.handlers.read().await.contains_key(method)
    }

    /// Dispatch one request envelope to its handler and produce the
    /// response envelope. Never panics; every failure path yields an
    /// error response correlated to the request id.
    pub async fn dispatch(&self, request: &Envelope) -> Envelope {
        let method = match request.method.as_deref() {
            Some(m) => m,
            None => {
                return Envelope::error_response(
                    request,
                    WireError::from(AgentError::internal("missing method")),
                );
            }
        };

        let handler = {
            let handlers = self.handlers.read().await;
            handlers.get(method).cloned()
        };
        let handler = match handler {
            Some(h) => h,
            None => {
                debug!(method, "Unknown method");
                return Envelope::error_response(
                    request,
                    WireError::from(AgentError::not_implemented(method)),
                );
            }
        };

        let params = request.params.clone().unwrap_or(Value::Null);
        if let Err(reason) = handler.validate(&params) {
            return Envelope::error_response(
                request,
                WireError::from(AgentError::invalid_params(reason)),
            );
        }

        let ctx = RequestContext {
            request_id: request.id.clone(),
            metadata: request.metadata.clone(),
        };

        match handler.handle(params, ctx).await {
            Ok(result) => Envelope::response(request, result),
            Err(err) => {
                debug!(method, code = err.code, "Handler failed: {}", err.message);
                Envelope::error_response(request, WireError::from(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use droidd_proto::error;
    use serde_json::json;

    struct EchoHandler;

    #[async_trait::async_trait]
    impl CommandHandler for EchoHandler {
        fn method(&self) -> &str {
            "test.echo"
        }

        fn validate(&self, params: &Value) -> Result<(), String> {
            if params.get("text").is_none() {
                return Err("missing 'text'".to_string());
            }
            Ok(())
        }

        async fn handle(&self, params: Value, ctx: RequestContext) -> Result<Value, AgentError> {
            Ok(json!({"echo": params["text"], "requestId": ctx.request_id}))
        }
    }

    struct FailingHandler;

    #[async_trait::async_trait]
    impl CommandHandler for FailingHandler {
        fn method(&self) -> &str {
            "test.fail"
        }

        async fn handle(&self, _params: Value, _ctx: RequestContext) -> Result<Value, AgentError> {
            Err(AgentError::new(error::ELEMENT_NOT_FOUND, "Element not found"))
        }
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let router = CommandRouter::new();
        router.register(Arc::new(EchoHandler)).await;

        let req = Envelope::request("test.echo", Some(json!({"text": "hi"})));
        let resp = router.dispatch(&req).await;
        assert_eq!(resp.id, req.id);
        assert!(resp.is_success());
        let result = resp.result.unwrap();
        assert_eq!(result["echo"], "hi");
        assert_eq!(result["requestId"], req.id.as_str());
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let router = CommandRouter::new();
        let req = Envelope::request("nope.nothing", None);
        let resp = router.dispatch(&req).await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, error::NOT_IMPLEMENTED);
        assert_eq!(err.category.as_str(), "INTERNAL");
        assert!(err.message.contains("Unknown method: nope.nothing"));
    }

    #[tokio::test]
    async fn test_missing_method() {
        let router = CommandRouter::new();
        let mut req = Envelope::request("x", None);
        req.method = None;
        let resp = router.dispatch(&req).await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, error::INTERNAL_ERROR);
        assert!(err.message.contains("missing method"));
    }

    #[tokio::test]
    async fn test_validation_failure() {
        let router = CommandRouter::new();
        router.register(Arc::new(EchoHandler)).await;
        let req = Envelope::request("test.echo", Some(json!({})));
        let resp = router.dispatch(&req).await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, error::INTERNAL_ERROR);
        assert!(err.message.contains("missing 'text'"));
    }

    #[tokio::test]
    async fn test_typed_error_passthrough() {
        let router = CommandRouter::new();
        router.register(Arc::new(FailingHandler)).await;
        let req = Envelope::request("test.fail", None);
        let resp = router.dispatch(&req).await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, error::ELEMENT_NOT_FOUND);
        assert_eq!(err.category.as_str(), "UI");
        assert!(err.recoverable);
    }

    #[tokio::test]
    async fn test_register_unregister_restores_state() {
        let router = CommandRouter::new();
        assert!(router.methods().await.is_empty());
        router.register(Arc::new(EchoHandler)).await;
        assert_eq!(router.methods().await, vec!["test.echo"]);
        assert!(router.unregister("test.echo").await);
        assert!(router.methods().await.is_empty());
        assert!(!router.unregister("test.echo").await);
    }

    #[tokio::test]
    async fn test_last_writer_wins() {
        struct Second;
        #[async_trait::async_trait]
        impl CommandHandler for Second {
            fn method(&self) -> &str {
                "test.echo"
            }
            async fn handle(&self, _p: Value, _c: RequestContext) -> Result<Value, AgentError> {
                Ok(json!({"version": 2}))
            }
        }

        let router = CommandRouter::new();
        router.register(Arc::new(EchoHandler)).await;
        router.register(Arc::new(Second)).await;
        let req = Envelope::request("test.echo", Some(json!({"text": "x"})));
        let resp = router.dispatch(&req).await;
        assert_eq!(resp.result.unwrap()["version"], 2);
    }
}
