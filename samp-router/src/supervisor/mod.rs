//! Runtime host build supervision
//!
//! Readies the external runtime host that serves the far end of the spool:
//! stages the host template tree, generates the build project from the
//! template's code locations, runs the build tool, and spawns the host the
//! first time the build output carries the completion signature. Later
//! signatures (incremental rebuilds) are logged and nothing else.

pub mod project;

use parking_lot::Mutex;
use samp_core::ErrorKind;
use samp_template::{Template, TemplateError};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::BuildConfig;
use crate::ipc::spool::{REQUESTS_DIR, RESPONSES_DIR};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Build already in progress")]
    AlreadyStarted,

    #[error("Runtime host failed to start earlier in this session")]
    PreviouslyFailed,

    #[error("No {0} command configured")]
    EmptyCommand(&'static str),

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Build exited ({0}) without signalling completion")]
    Failed(String),

    #[error("Build did not signal completion within {0:?}")]
    Timeout(Duration),

    #[error("Supervisor cancelled")]
    Cancelled,

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl BuildError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Build
    }
}

/// Build lifecycle of the session's runtime host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    NotStarted,
    Building,
    /// The runtime host was spawned
    Ready,
    /// The build or the host spawn failed; terminal for the session
    Failed,
}

/// Monotonic `NotStarted -> Building -> Ready | Failed` state
#[derive(Debug)]
struct Lifecycle {
    state: Mutex<BuildState>,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            state: Mutex::new(BuildState::NotStarted),
        }
    }

    fn get(&self) -> BuildState {
        *self.state.lock()
    }

    /// `NotStarted -> Building`; returns the current state otherwise
    fn begin(&self) -> Result<(), BuildState> {
        let mut state = self.state.lock();
        match *state {
            BuildState::NotStarted => {
                *state = BuildState::Building;
                Ok(())
            }
            current => Err(current),
        }
    }

    /// Leave `Building` through `spawn`: `Ready` if it succeeds, `Failed`
    /// otherwise. Only the call that finds `Building` runs `spawn`.
    fn finish_with<F>(&self, spawn: F) -> Option<Result<(), BuildError>>
    where
        F: FnOnce() -> Result<(), BuildError>,
    {
        let mut state = self.state.lock();
        if *state != BuildState::Building {
            return None;
        }
        let result = spawn();
        *state = if result.is_ok() {
            BuildState::Ready
        } else {
            BuildState::Failed
        };
        Some(result)
    }

    /// `Building -> Failed`
    fn fail(&self) -> bool {
        let mut state = self.state.lock();
        if *state == BuildState::Building {
            *state = BuildState::Failed;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Build,
    Host,
}

/// Supervises the build tool and the runtime host subprocesses
pub struct RuntimeSupervisor {
    config: BuildConfig,
    project_root: PathBuf,
    output_dir: PathBuf,
    lifecycle: Arc<Lifecycle>,
    completions: Arc<AtomicUsize>,
    host_spawns: Arc<AtomicUsize>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    cancel: CancellationToken,
}

impl RuntimeSupervisor {
    /// `output_dir` is taken relative to `project_root` unless absolute
    pub fn new(project_root: impl Into<PathBuf>, output_dir: &Path, config: BuildConfig) -> Self {
        let project_root = project_root.into();
        let output_dir = project_root.join(output_dir);
        Self {
            config,
            project_root,
            output_dir,
            lifecycle: Arc::new(Lifecycle::new()),
            completions: Arc::new(AtomicUsize::new(0)),
            host_spawns: Arc::new(AtomicUsize::new(0)),
            tasks: Arc::new(Mutex::new(Vec::new())),
            cancel: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> BuildState {
        self.lifecycle.get()
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Completion signatures seen in build output so far
    pub fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }

    /// Runtime hosts spawned so far; never more than one
    pub fn host_spawns(&self) -> usize {
        self.host_spawns.load(Ordering::SeqCst)
    }

    /// Stage host assets and generate the build project
    pub fn prepare(&self, template: &Template) -> Result<PathBuf, BuildError> {
        std::fs::create_dir_all(&self.output_dir)?;

        let staged = if let Some(host_template) = &self.config.host_template_dir {
            let source = self.project_root.join(host_template);
            info!(source = %source.display(), "Copying runtime host template");
            project::copy_tree(&source, &self.output_dir)?;
            true
        } else {
            false
        };

        let locations = template.code_locations();
        let descriptor =
            project::materialize_descriptor(&self.config, &self.output_dir, &locations, staged)?;

        project::copy_settings(&self.project_root, &self.output_dir, &self.config.settings_file);

        Ok(descriptor)
    }

    /// Run the build and wait until the runtime host has been spawned
    ///
    /// Calling again after the host is ready is a no-op. A failed build or
    /// host spawn is terminal and stops any subprocess still running.
    pub async fn start(&self, template: &Template) -> Result<(), BuildError> {
        match self.lifecycle.begin() {
            Ok(()) => {}
            Err(BuildState::Ready) => return Ok(()),
            Err(BuildState::Failed) => return Err(BuildError::PreviouslyFailed),
            Err(_) => return Err(BuildError::AlreadyStarted),
        }

        let result = self.run_build(template).await;
        if result.is_err() {
            self.lifecycle.fail();
            self.cancel.cancel();
        }
        result
    }

    async fn run_build(&self, template: &Template) -> Result<(), BuildError> {
        let descriptor = self.prepare(template)?;
        let argv = self.config.expand(&self.config.command, &self.output_dir);
        info!(command = ?argv, descriptor = %descriptor.display(), "Starting build");

        let mut build = self.command(&argv, "build")?.spawn().map_err(|source| BuildError::Spawn {
            program: argv[0].clone(),
            source,
        })?;

        let (ready_tx, ready_rx) = oneshot::channel();
        let monitor = BuildMonitor {
            config: self.config.clone(),
            project_root: self.project_root.clone(),
            output_dir: self.output_dir.clone(),
            lifecycle: self.lifecycle.clone(),
            completions: self.completions.clone(),
            host_spawns: self.host_spawns.clone(),
            tasks: self.tasks.clone(),
            cancel: self.cancel.clone(),
        };

        let stdout = build.stdout.take();
        if let Some(stderr) = build.stderr.take() {
            self.track(tokio::spawn(forward_lines(stderr, Stream::Build, "stderr", self.config.mute_output)));
        }
        self.track(tokio::spawn(monitor.run(build, stdout, ready_tx)));

        let bound = self.config.ready_timeout();
        match tokio::time::timeout(bound, ready_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BuildError::Cancelled),
            Err(_) => {
                error!(timeout = ?bound, "Build did not complete in time");
                Err(BuildError::Timeout(bound))
            }
        }
    }

    /// Kill the build and runtime host subprocesses
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        info!("Runtime supervisor stopped");
    }

    fn track(&self, task: JoinHandle<()>) {
        self.tasks.lock().push(task);
    }

    fn command(&self, argv: &[String], what: &'static str) -> Result<Command, BuildError> {
        build_command(argv, what, &self.project_root, &self.output_dir)
    }
}

fn build_command(
    argv: &[String],
    what: &'static str,
    project_root: &Path,
    output_dir: &Path,
) -> Result<Command, BuildError> {
    let (program, args) = argv.split_first().ok_or(BuildError::EmptyCommand(what))?;
    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(project_root)
        .env("SAMP_OUTPUT_DIR", output_dir)
        .env("SAMP_REQUESTS_DIR", output_dir.join(REQUESTS_DIR))
        .env("SAMP_RESPONSES_DIR", output_dir.join(RESPONSES_DIR))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    Ok(command)
}

/// State moved into the build output task
struct BuildMonitor {
    config: BuildConfig,
    project_root: PathBuf,
    output_dir: PathBuf,
    lifecycle: Arc<Lifecycle>,
    completions: Arc<AtomicUsize>,
    host_spawns: Arc<AtomicUsize>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    cancel: CancellationToken,
}

impl BuildMonitor {
    async fn run(
        self,
        mut build: Child,
        stdout: Option<impl AsyncRead + Unpin>,
        ready_tx: oneshot::Sender<Result<(), BuildError>>,
    ) {
        let mut ready_tx = Some(ready_tx);

        if let Some(stdout) = stdout {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    () = self.cancel.cancelled() => {
                        let _ = build.kill().await;
                        debug!("Build cancelled");
                        return;
                    }
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => self.on_line(&line, &mut ready_tx),
                        Ok(None) => break,
                        Err(e) => {
                            warn!(error = %e, "Error reading build output");
                            break;
                        }
                    },
                }
            }
        }

        let status = tokio::select! {
            () = self.cancel.cancelled() => {
                let _ = build.kill().await;
                return;
            }
            status = build.wait() => status,
        };

        match status {
            Ok(status) if status.success() => debug!("Build tool exited"),
            Ok(status) => warn!(status = %status, "Build tool exited with failure"),
            Err(ref e) => warn!(error = %e, "Could not wait for build tool"),
        }

        if let Some(tx) = ready_tx.take() {
            let reason = match status {
                Ok(status) => status.to_string(),
                Err(e) => e.to_string(),
            };
            let _ = tx.send(Err(BuildError::Failed(reason)));
        }
    }

    fn on_line(&self, line: &str, ready_tx: &mut Option<oneshot::Sender<Result<(), BuildError>>>) {
        if !self.config.mute_output {
            info!(target: "samp::build", "{line}");
        }

        if !line.contains(&self.config.completion_signature) {
            return;
        }

        let seen = self.completions.fetch_add(1, Ordering::SeqCst) + 1;
        let Some(result) = self.lifecycle.finish_with(|| {
            info!("Build complete, starting runtime host");
            self.spawn_host()
        }) else {
            debug!(
                completions = seen,
                state = ?self.lifecycle.get(),
                "Rebuild finished, runtime host not respawned"
            );
            return;
        };

        if let Err(e) = &result {
            error!(error = %e, "Runtime host did not start");
        }
        if let Some(tx) = ready_tx.take() {
            let _ = tx.send(result);
        }
    }

    fn spawn_host(&self) -> Result<(), BuildError> {
        let argv = self.config.expand(&self.config.host_command, &self.output_dir);
        let mut host = build_command(&argv, "host", &self.project_root, &self.output_dir)?
            .spawn()
            .map_err(|source| BuildError::Spawn {
                program: argv[0].clone(),
                source,
            })?;
        self.host_spawns.fetch_add(1, Ordering::SeqCst);
        info!(command = ?argv, pid = ?host.id(), "Runtime host started");

        let mute = self.config.mute_output;
        let mut tasks = self.tasks.lock();
        if let Some(stdout) = host.stdout.take() {
            tasks.push(tokio::spawn(forward_lines(stdout, Stream::Host, "stdout", mute)));
        }
        if let Some(stderr) = host.stderr.take() {
            tasks.push(tokio::spawn(forward_lines(stderr, Stream::Host, "stderr", mute)));
        }

        let cancel = self.cancel.clone();
        tasks.push(tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = host.kill().await;
                    info!("Runtime host stopped");
                }
                status = host.wait() => match status {
                    Ok(status) => warn!(status = %status, "Runtime host exited"),
                    Err(e) => error!(error = %e, "Could not wait for runtime host"),
                },
            }
        }));
        Ok(())
    }
}

async fn forward_lines(reader: impl AsyncRead + Unpin, stream: Stream, channel: &'static str, mute: bool) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if mute {
            continue;
        }
        match stream {
            Stream::Build => info!(target: "samp::build", channel, "{line}"),
            Stream::Host => info!(target: "samp::host", channel, "{line}"),
        }
    }
}
