//! Invocation requests, environments and results

use crate::error::ErrorPayload;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Marker variable set for every local invocation
pub const LOCAL_DEBUG_VAR: &str = "LOCAL_DEBUG";

/// Context passed alongside the event
///
/// Only the fields the router needs are typed; everything else the caller
/// supplied is kept in `extra` and forwarded untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationContext {
    /// Physical identifier of the deployed function
    pub function_name: String,
    /// Unique id of this invocation, used to name spool files
    #[serde(alias = "invocationId")]
    pub aws_request_id: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl InvocationContext {
    pub fn new(function_name: impl Into<String>, aws_request_id: impl Into<String>) -> Self {
        Self {
            function_name: function_name.into(),
            aws_request_id: aws_request_id.into(),
            extra: serde_json::Map::new(),
        }
    }
}

/// One request to execute a function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRequest {
    #[serde(default)]
    pub event: Value,
    pub context: InvocationContext,
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
}

impl InvocationRequest {
    pub fn new(event: Value, context: InvocationContext) -> Self {
        Self {
            event,
            context,
            env_vars: HashMap::new(),
        }
    }

    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    pub fn invocation_id(&self) -> &str {
        &self.context.aws_request_id
    }

    pub fn function_name(&self) -> &str {
        &self.context.function_name
    }
}

/// Effective environment of one invocation
///
/// A snapshot of the caller's variables plus the local-debug marker. It is
/// handed to the handler explicitly and never written to the process
/// environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationEnv {
    vars: BTreeMap<String, String>,
}

impl InvocationEnv {
    pub fn from_request(request: &InvocationRequest) -> Self {
        let mut vars: BTreeMap<String, String> = request
            .env_vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        vars.insert(LOCAL_DEBUG_VAR.to_string(), "true".to_string());
        Self { vars }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Result of a routed invocation
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationOutput {
    /// Structured result returned by an in-process handler
    Json(Value),
    /// Raw response file contents from the runtime host
    Raw(String),
}

impl InvocationOutput {
    /// `{"error": message}`
    pub fn error(message: impl Into<String>) -> Self {
        Self::Json(ErrorPayload::new(message).to_json())
    }

    /// Returns the message when this output is an `{"error": ...}` payload
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Json(Value::Object(map)) if map.len() == 1 => {
                map.get("error").and_then(Value::as_str)
            }
            _ => None,
        }
    }

    /// Text handed back to the parent process
    ///
    /// Strings pass through verbatim, structured values are pretty printed
    /// and an empty result renders as an empty string.
    pub fn render(&self) -> String {
        match self {
            Self::Raw(s) | Self::Json(Value::String(s)) => s.clone(),
            Self::Json(Value::Null) => String::new(),
            Self::Json(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
        }
    }
}
