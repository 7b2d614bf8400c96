//! In-process invocation
//!
//! Functions whose runtime matches the router's native runtime are served by
//! handlers registered with a [`HandlerLoader`]. Handlers are looked up by
//! `(module, handler)` on first use and cached. Every failure, including a
//! panic inside the handler, is converted into an `{"error": message}`
//! result here and never reaches the caller as a crash.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use samp_core::{
    ErrorKind, FunctionRecord, InvocationContext, InvocationEnv, InvocationOutput,
    InvocationRequest,
};
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Handler {handler} not found in module {module}")]
    NotFound { module: String, handler: String },

    #[error("{0}")]
    Failed(String),

    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Handler
    }
}

/// What a handler sees besides the event
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub context: InvocationContext,
    pub env: InvocationEnv,
}

/// A callable function implementation
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, event: Value, ctx: &HandlerContext) -> Result<Value, HandlerError>;

    /// Handlers that depend on process-wide state return true and are run
    /// one at a time.
    fn exclusive(&self) -> bool {
        false
    }
}

/// Adapter for plain closures
pub struct FnHandler<F> {
    f: F,
}

/// Wrap a synchronous closure as a [`Handler`]
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(Value, &HandlerContext) -> Result<Value, String> + Send + Sync,
{
    FnHandler { f }
}

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(Value, &HandlerContext) -> Result<Value, String> + Send + Sync,
{
    async fn call(&self, event: Value, ctx: &HandlerContext) -> Result<Value, HandlerError> {
        (self.f)(event, ctx).map_err(HandlerError::Failed)
    }
}

/// Resolves a `(module, handler)` reference to a callable
pub trait HandlerLoader: Send + Sync {
    fn load(&self, module: &str, handler: &str) -> Result<Arc<dyn Handler>, HandlerError>;
}

/// Loader backed by handlers registered up front
#[derive(Default)]
pub struct StaticLoader {
    handlers: DashMap<(String, String), Arc<dyn Handler>>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&self, module: impl Into<String>, handler: impl Into<String>, h: H)
    where
        H: Handler + 'static,
    {
        self.handlers
            .insert((module.into(), handler.into()), Arc::new(h));
    }

    pub fn with<H>(self, module: impl Into<String>, handler: impl Into<String>, h: H) -> Self
    where
        H: Handler + 'static,
    {
        self.register(module, handler, h);
        self
    }
}

impl HandlerLoader for StaticLoader {
    fn load(&self, module: &str, handler: &str) -> Result<Arc<dyn Handler>, HandlerError> {
        self.handlers
            .get(&(module.to_string(), handler.to_string()))
            .map(|h| h.value().clone())
            .ok_or_else(|| HandlerError::NotFound {
                module: module.to_string(),
                handler: handler.to_string(),
            })
    }
}

/// Lazily populated cache in front of a loader
pub struct HandlerRegistry {
    loader: Arc<dyn HandlerLoader>,
    cache: DashMap<(String, String), Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new(loader: Arc<dyn HandlerLoader>) -> Self {
        Self {
            loader,
            cache: DashMap::new(),
        }
    }

    /// Cached handler, loading it on first use. Load failures are not cached.
    pub fn get(&self, module: &str, handler: &str) -> Result<Arc<dyn Handler>, HandlerError> {
        let key = (module.to_string(), handler.to_string());
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached.value().clone());
        }

        let loaded = self.loader.load(module, handler)?;
        debug!(module = %module, handler = %handler, "Loaded native handler");
        Ok(self.cache.entry(key).or_insert(loaded).value().clone())
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

/// Runs native handlers in the router process
pub struct NativeInvoker {
    registry: HandlerRegistry,
    exclusive: Mutex<()>,
}

impl NativeInvoker {
    pub fn new(loader: Arc<dyn HandlerLoader>) -> Self {
        Self {
            registry: HandlerRegistry::new(loader),
            exclusive: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Invoke and convert any failure into an `{"error": message}` result
    pub async fn invoke(
        &self,
        function: &FunctionRecord,
        request: &InvocationRequest,
        env: InvocationEnv,
    ) -> InvocationOutput {
        match self.try_invoke(function, request, env).await {
            Ok(value) => InvocationOutput::Json(value),
            Err(e) => {
                warn!(
                    logical_id = %function.logical_id,
                    invocation_id = %request.invocation_id(),
                    error = %e,
                    "Native handler failed"
                );
                InvocationOutput::error(e.to_string())
            }
        }
    }

    async fn try_invoke(
        &self,
        function: &FunctionRecord,
        request: &InvocationRequest,
        env: InvocationEnv,
    ) -> Result<Value, HandlerError> {
        let handler = self.registry.get(&function.module, &function.handler)?;
        let ctx = HandlerContext {
            context: request.context.clone(),
            env,
        };

        let _guard = if handler.exclusive() {
            Some(self.exclusive.lock().await)
        } else {
            None
        };

        AssertUnwindSafe(handler.call(request.event.clone(), &ctx))
            .catch_unwind()
            .await
            .map_err(|panic| HandlerError::Panicked(panic_message(panic.as_ref())))?
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
