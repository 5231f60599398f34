//! action-invoker CLI: run a job file through the local invoker.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use action_invoker::config::Config;
use action_invoker::lifecycle::{
    BroadcastSink, LifecycleEvent, LifecyclePhase, TracingSink, WorkItemLifecyclePublisher,
};
use action_invoker::params::{ACTION_CLASS, ACTION_ID};
use action_invoker::telemetry::{TelemetryConfig, init_telemetry};
use action_invoker::{Action, ActionContext, ActionDetails, ActionInvoker, ActionOutcome, Params};
use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::json;

#[derive(Parser)]
#[command(name = "action-invoker", about = "Run scheduled actions locally")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Invoke the action described by a job file
    Invoke {
        /// Path to a TOML job file
        job: PathBuf,
        /// Run as this user instead of the job's user
        #[arg(long)]
        user: Option<String>,
    },
    /// List the built-in actions
    Actions,
}

/// A job file: which action to run, as whom, with what parameters.
#[derive(Debug, Deserialize)]
struct Job {
    action: String,
    user: Option<String>,
    #[serde(default)]
    params: Params,
}

const BUILTIN_ACTIONS: [(&str, &str); 4] = [
    ("echo", "report the parameters back as details"),
    ("touch", "succeed and ask the caller to persist an update"),
    ("fail", "return an error"),
    ("panic", "panic while running"),
];

struct Builtin(&'static str);

impl Action for Builtin {
    fn name(&self) -> &str {
        self.0
    }

    fn execute(&self, ctx: ActionContext<'_>) -> anyhow::Result<ActionOutcome> {
        match self.0 {
            "echo" => Ok(ActionOutcome::unchanged().with_details(json!({
                "principal": ctx.security.principal,
                "params": ctx.params,
                "stream_provider": ctx.stream_provider,
            }))),
            "touch" => Ok(ActionOutcome::requires_update()),
            "fail" => anyhow::bail!("{} failed on request", ctx.security.principal),
            _ => panic!("panic requested by job"),
        }
    }
}

fn resolve_action(name: &str) -> anyhow::Result<Arc<dyn Action>> {
    BUILTIN_ACTIONS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(n, _)| Arc::new(Builtin(*n)) as Arc<dyn Action>)
        .with_context(|| format!("unknown action {name:?}, see `action-invoker actions`"))
}

fn load_job(path: &Path) -> anyhow::Result<Job> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Actions => {
            for (name, about) in BUILTIN_ACTIONS {
                println!("{name:<8} {about}");
            }
            Ok(())
        }
        Command::Invoke { job, user } => {
            let config = Config::from_env()?;
            let guard = init_telemetry(TelemetryConfig::from_config(&config, "action-invoker"))?;

            let output =
                tokio::task::spawn_blocking(move || cmd_invoke(&config, &job, user)).await??;
            println!("{}", serde_json::to_string_pretty(&output)?);

            tokio::task::spawn_blocking(move || guard.force_flush()).await?;
            Ok(())
        }
    }
}

fn cmd_invoke(config: &Config, path: &Path, user: Option<String>) -> anyhow::Result<serde_json::Value> {
    let mut job = load_job(path)?;
    let action = resolve_action(&job.action)?;

    // Jobs written by hand may leave out the markers the scheduler adds.
    job.params
        .entry(ACTION_CLASS)
        .or_insert_with(|| json!(job.action));
    if !job.params.contains_key(ACTION_ID) {
        let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned());
        job.params
            .insert(ACTION_ID.to_string(), json!(stem.unwrap_or_else(|| "job".into())));
    }

    let events = BroadcastSink::new(16);
    let mut rx = events.subscribe();
    let publisher = WorkItemLifecyclePublisher::new()
        .with_sink(Arc::new(TracingSink))
        .with_sink(Arc::new(events));
    let invoker = ActionInvoker::new(config.invoker(), publisher);

    let mut details = ActionDetails::new(action, job.params.clone());
    details.user_name = user.or(job.user);
    let uid = details.work_item_uid();

    let status = invoker.invoke(details)?;
    if status.is_success() {
        invoker.publisher().publish(
            uid.as_ref(),
            Some(&job.params),
            LifecyclePhase::Succeeded,
            None,
        );
    }

    let mut published: Vec<LifecycleEvent> = Vec::new();
    while let Ok(event) = rx.try_recv() {
        published.push(event);
    }

    Ok(json!({
        "work_item_uid": uid,
        "status": {
            "success": status.is_success(),
            "failure": status.failure.as_ref().map(ToString::to_string),
            "requires_update": status.requires_update,
            "details": status.details,
        },
        "events": published,
    }))
}
