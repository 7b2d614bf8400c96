//! samp - local invocation of deployed cloud functions
//!
//! Routes invocations of a deployed stack's functions to the local code
//! that implements them, and builds and runs the runtime host that serves
//! the non-native ones.

mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use samp_core::{FunctionRecords, InvocationRequest, StackSnapshot};
use samp_router::{Router, RuntimeSupervisor, StaticLoader};
use samp_template::Template;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "samp")]
#[command(about = "Local invocation router for deployed serverless stacks", long_about = None)]
struct Args {
    /// Configuration file (defaults to ./samp.toml when present)
    #[arg(long, global = true, env = "SAMP_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for the spool and build output
    #[arg(long, global = true, env = "SAMP_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "SAMP_LOG_LEVEL")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Route one invocation and print its result
    Route {
        /// Invocation request as JSON, or @file
        request: String,

        /// Stack resource summaries as JSON, or @file
        stack: String,

        /// Function records as JSON, or @file; read from the template when omitted
        functions: Option<String>,

        /// Template used when no function records are given
        #[arg(long)]
        template: Option<PathBuf>,
    },

    /// Build and run the runtime host until interrupted
    Start {
        /// Template to take code locations from
        #[arg(long)]
        template: Option<PathBuf>,

        /// Project root
        #[arg(long, default_value = ".")]
        project: PathBuf,
    },

    /// Print the function records derived from a template
    Functions {
        #[arg(long)]
        template: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries results only
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("samp={}", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut router_config = config::load(args.config.as_deref())?;
    if let Some(output_dir) = args.output_dir {
        router_config = router_config.with_output_dir(output_dir);
    }

    match args.command {
        Command::Route {
            request,
            stack,
            functions,
            template,
        } => {
            let request: InvocationRequest = serde_json::from_str(&read_arg(&request)?)
                .context("Invalid invocation request")?;
            let snapshot: StackSnapshot =
                serde_json::from_str(&read_arg(&stack)?).context("Invalid stack snapshot")?;
            let functions: FunctionRecords = match functions {
                Some(functions) => serde_json::from_str(&read_arg(&functions)?)
                    .context("Invalid function records")?,
                None => load_template(template.as_deref(), Path::new("."))?.function_records(),
            };

            let router = Router::new(&router_config, Arc::new(StaticLoader::new()));
            let output = router.route(&request, &snapshot, &functions).await?;
            println!("{}", output.render());
        }

        Command::Start { template, project } => {
            let template = load_template(template.as_deref(), &project)?;
            let supervisor =
                RuntimeSupervisor::new(&project, &router_config.output_dir, router_config.build);

            info!(output_dir = %supervisor.output_dir().display(), "Starting runtime host");
            let started = tokio::select! {
                result = supervisor.start(&template) => result,
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted during build");
                    supervisor.shutdown().await;
                    return Ok(());
                }
            };
            if let Err(e) = started {
                error!(error = %e, "Runtime host did not start");
                supervisor.shutdown().await;
                return Err(e.into());
            }

            info!("Runtime host ready, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            supervisor.shutdown().await;
        }

        Command::Functions { template } => {
            let template = load_template(template.as_deref(), Path::new("."))?;
            println!(
                "{}",
                serde_json::to_string_pretty(&template.function_records())?
            );
        }
    }

    Ok(())
}

/// Inline JSON, or the contents of the file named after a leading `@`
fn read_arg(value: &str) -> anyhow::Result<String> {
    match value.strip_prefix('@') {
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("Could not read {path}"))
        }
        None => Ok(value.to_string()),
    }
}

fn load_template(path: Option<&Path>, project: &Path) -> anyhow::Result<Template> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => Template::find(project)?,
    };
    Template::from_file(&path).with_context(|| format!("Could not load template {}", path.display()))
}
