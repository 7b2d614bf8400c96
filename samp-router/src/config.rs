//! Router configuration

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level router configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    /// Working directory holding the spool and the generated build project
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Runtime served in-process by registered handlers
    #[serde(default = "default_native_runtime")]
    pub native_runtime: String,

    #[serde(default)]
    pub ipc: IpcConfig,

    #[serde(default)]
    pub build: BuildConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            native_runtime: default_native_runtime(),
            ipc: IpcConfig::default(),
            build: BuildConfig::default(),
        }
    }
}

impl RouterConfig {
    /// Same configuration rooted at a different output directory
    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }
}

/// File-based exchange settings
#[derive(Debug, Clone, Deserialize)]
pub struct IpcConfig {
    /// Bound on waiting for a response file
    #[serde(default = "default_response_timeout_secs")]
    pub response_timeout_secs: u64,

    /// Poll the responses directory at this interval instead of relying on
    /// native filesystem notifications
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,

    /// Delay before reading a response that was created but may still be
    /// being written
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            response_timeout_secs: default_response_timeout_secs(),
            poll_interval_ms: None,
            settle_ms: default_settle_ms(),
        }
    }
}

impl IpcConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_ms.map(Duration::from_millis)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Runtime host build settings
///
/// Commands are argument vectors; `{descriptor}` and `{output}` are replaced
/// with the generated project descriptor path and the output directory.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildConfig {
    #[serde(default = "default_build_command")]
    pub command: Vec<String>,

    /// File name of the build project descriptor inside the output directory
    #[serde(default = "default_descriptor")]
    pub descriptor: String,

    /// Marker in the descriptor where project references are inserted
    #[serde(default = "default_placeholder")]
    pub placeholder: String,

    /// One project reference; `%code_uri%` is replaced with the code location
    #[serde(default = "default_reference_template")]
    pub reference_template: String,

    /// Build output line fragment that signals a finished build
    #[serde(default = "default_completion_signature")]
    pub completion_signature: String,

    /// Runtime host template tree copied into the output directory
    #[serde(default)]
    pub host_template_dir: Option<PathBuf>,

    #[serde(default = "default_host_command")]
    pub host_command: Vec<String>,

    /// Application settings file searched for in the project and copied
    #[serde(default = "default_settings_file")]
    pub settings_file: String,

    /// Suppress forwarding of build and host output
    #[serde(default)]
    pub mute_output: bool,

    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            command: default_build_command(),
            descriptor: default_descriptor(),
            placeholder: default_placeholder(),
            reference_template: default_reference_template(),
            completion_signature: default_completion_signature(),
            host_template_dir: None,
            host_command: default_host_command(),
            settings_file: default_settings_file(),
            mute_output: false,
            ready_timeout_secs: default_ready_timeout_secs(),
        }
    }
}

impl BuildConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn descriptor_path(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(&self.descriptor)
    }

    /// Substitute `{descriptor}` and `{output}` in a command vector
    pub fn expand(&self, command: &[String], output_dir: &Path) -> Vec<String> {
        let descriptor = self.descriptor_path(output_dir);
        command
            .iter()
            .map(|arg| {
                arg.replace("{descriptor}", &descriptor.to_string_lossy())
                    .replace("{output}", &output_dir.to_string_lossy())
            })
            .collect()
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".samp-out")
}

fn default_native_runtime() -> String {
    "provided".to_string()
}

fn default_response_timeout_secs() -> u64 {
    30
}

fn default_settle_ms() -> u64 {
    50
}

fn default_build_command() -> Vec<String> {
    vec!["dotnet".into(), "build".into(), "{descriptor}".into()]
}

fn default_descriptor() -> String {
    "dotnet.csproj".to_string()
}

fn default_placeholder() -> String {
    "<!-- Projects -->".to_string()
}

fn default_reference_template() -> String {
    r#"<ProjectReference Include="../%code_uri%.csproj" />"#.to_string()
}

fn default_completion_signature() -> String {
    "Time Elapsed".to_string()
}

fn default_host_command() -> Vec<String> {
    vec![
        "dotnet".into(),
        "run".into(),
        "--no-build".into(),
        "--project".into(),
        "{descriptor}".into(),
    ]
}

fn default_settings_file() -> String {
    "appsettings.json".to_string()
}

fn default_ready_timeout_secs() -> u64 {
    300
}
