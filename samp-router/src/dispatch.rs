//! Invocation dispatch

use samp_core::{
    ErrorKind, FunctionRecord, FunctionRecords, InvocationEnv, InvocationOutput,
    InvocationRequest, RuntimeLanguage, StackSnapshot,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::RouterConfig;
use crate::ipc::{IpcChannel, IpcError, SpoolDirs};
use crate::native::{HandlerLoader, NativeInvoker};
use crate::resolver;

/// Session-level routing failure
///
/// Resolution and handler failures never show up here; they are returned as
/// `{"error": message}` outputs.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    Ipc(#[from] IpcError),
}

impl RouteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Ipc(e) => e.kind(),
        }
    }
}

/// Where an invocation runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPath {
    /// Registered handler in this process
    InProcess,
    /// External runtime host over the spool
    Bridged,
}

/// Routes invocations to an in-process handler or the runtime host
pub struct Router {
    native: RuntimeLanguage,
    invoker: NativeInvoker,
    channel: IpcChannel,
}

impl Router {
    pub fn new(config: &RouterConfig, loader: Arc<dyn HandlerLoader>) -> Self {
        let channel = IpcChannel::new(SpoolDirs::new(&config.output_dir), config.ipc.clone());
        Self::with_channel(
            RuntimeLanguage::from_runtime(&config.native_runtime),
            loader,
            channel,
        )
    }

    pub fn with_channel(
        native: RuntimeLanguage,
        loader: Arc<dyn HandlerLoader>,
        channel: IpcChannel,
    ) -> Self {
        Self {
            native,
            invoker: NativeInvoker::new(loader),
            channel,
        }
    }

    pub fn native_language(&self) -> &RuntimeLanguage {
        &self.native
    }

    pub fn channel(&self) -> &IpcChannel {
        &self.channel
    }

    pub fn select_path(&self, function: &FunctionRecord) -> ExecutionPath {
        if function.language() == self.native {
            ExecutionPath::InProcess
        } else {
            ExecutionPath::Bridged
        }
    }

    /// Resolve and run one invocation
    pub async fn route(
        &self,
        request: &InvocationRequest,
        snapshot: &StackSnapshot,
        functions: &FunctionRecords,
    ) -> Result<InvocationOutput, RouteError> {
        let function = match resolver::resolve(request.function_name(), snapshot, functions) {
            Ok(function) => function,
            Err(e) => {
                warn!(
                    function_name = %request.function_name(),
                    invocation_id = %request.invocation_id(),
                    error = %e,
                    "Could not resolve function"
                );
                return Ok(InvocationOutput::error(e.to_string()));
            }
        };

        let path = self.select_path(function);
        info!(
            logical_id = %function.logical_id,
            runtime = %function.runtime,
            invocation_id = %request.invocation_id(),
            path = ?path,
            "Routing invocation"
        );

        match path {
            ExecutionPath::InProcess => {
                let env = InvocationEnv::from_request(request);
                Ok(self.invoker.invoke(function, request, env).await)
            }
            ExecutionPath::Bridged => {
                let body = self.channel.exchange(&function.handler, request).await?;
                debug!(invocation_id = %request.invocation_id(), bytes = body.len(), "Runtime host responded");
                Ok(InvocationOutput::Raw(body))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{handler_fn, StaticLoader};
    use samp_core::{InvocationContext, StackResourceSummary};
    use serde_json::json;

    fn router(output_dir: &std::path::Path) -> Router {
        let loader = StaticLoader::new().with(
            "orders",
            "handle",
            handler_fn(|event, _| Ok(json!({"handled": event}))),
        );
        let config = RouterConfig::default().with_output_dir(output_dir);
        Router::new(&config, Arc::new(loader))
    }

    fn fixtures() -> (StackSnapshot, FunctionRecords) {
        let snapshot = StackSnapshot::try_new(vec![
            StackResourceSummary::new("Native", "native-123"),
            StackResourceSummary::new("Python", "python-123"),
        ])
        .unwrap();
        let functions = [
            FunctionRecord::new("Native", "provided.al2023", "orders", "handle"),
            FunctionRecord::new("Python", "python3.12", "src/py", "app.handler"),
        ]
        .into_iter()
        .collect();
        (snapshot, functions)
    }

    #[test]
    fn test_select_path() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(dir.path());
        let (_, functions) = fixtures();

        assert_eq!(
            router.select_path(functions.get("Native").unwrap()),
            ExecutionPath::InProcess
        );
        assert_eq!(
            router.select_path(functions.get("Python").unwrap()),
            ExecutionPath::Bridged
        );
    }

    #[tokio::test]
    async fn test_native_route() {
        let dir = tempfile::tempdir().unwrap();
        let router = router(&dir.path().join("out"));
        let (snapshot, functions) = fixtures();

        let request = InvocationRequest::new(json!(5), InvocationContext::new("native-123", "r1"));
        let output = router.route(&request, &snapshot, &functions).await.unwrap();
        assert_eq!(output, InvocationOutput::Json(json!({"handled": 5})));
        assert!(!dir.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_unresolved_function_is_an_error_result() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let router = router(&out);
        let (snapshot, functions) = fixtures();

        let request = InvocationRequest::new(json!({}), InvocationContext::new("missing", "r2"));
        let output = router.route(&request, &snapshot, &functions).await.unwrap();
        assert_eq!(
            output.error_message(),
            Some("No stack resource with physical id missing")
        );
        assert!(!out.exists());
    }
}
