use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use serde_json::{json, Value};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::ai::Gateway;
use crate::auth::Token;
use crate::config::Config;
use crate::diff;
use crate::events::{parse_pipeline_hook, FailureEvent, HookEvent, PipelineOutcomeEvent, PipelineStatus};
use crate::output::{self, StepProgress};
use crate::providers::GitLabRepository;
use crate::remediation::{AutomationOutcome, Remediator, SelfHealOutcome};
use crate::store::IncidentStore;

#[derive(Parser)]
#[command(name = "pipefix")]
#[command(author, version, about = "CI pipeline failure remediation", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ./pipefix.{toml,json,yaml,yml})
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Incident store file (defaults to the user cache directory)
    #[arg(short, long, global = true)]
    store: Option<PathBuf>,

    /// GitLab access token
    #[arg(short, long, global = true, env = "GITLAB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// GitLab project path, overrides the configured one
    #[arg(short = 'P', long, global = true)]
    project: Option<String>,

    #[arg(short, long, global = true, default_value_t = false)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Open an incident for a failure event and run automation on it
    Remediate {
        /// Failure event JSON file, or '-' for stdin
        #[arg(short, long)]
        event: String,
    },
    /// Route a GitLab Pipeline Hook payload
    Hook {
        /// Webhook payload JSON file, or '-' for stdin
        #[arg(long)]
        payload: String,
    },
    /// Report the outcome of a pipeline on a remediation branch
    Outcome {
        #[arg(short, long)]
        branch: String,

        /// success, failed, running, ...
        #[arg(long)]
        status: String,

        #[arg(long)]
        pipeline_id: Option<u64>,
    },
    /// Open the merge request for an incident's validated patch
    Publish { id: String },
    /// Run automation again for an existing incident
    Rerun { id: String },
    /// Show one incident, or all of them
    Status {
        id: Option<String>,

        /// Print the stored record instead of a table
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Check a unified diff against the accepted grammar
    Validate {
        /// Diff file, or '-' for stdin
        diff: String,
    },
    /// Apply a unified diff to a file's content
    Apply { diff: String, original: PathBuf },
}

impl Cli {
    /// Runs the selected command and prints its envelope.
    ///
    /// Returns whether the command succeeded; failures are reported in the
    /// envelope rather than returned.
    pub async fn execute(&self) -> Result<bool> {
        if let Commands::Status { id, json: false } = &self.command {
            self.show_status(id.as_deref()).await?;
            return Ok(true);
        }

        let (success, body) = match self.dispatch().await {
            Ok(result) => result,
            Err(e) => {
                error!("{e:#}");
                (false, json!({ "error": format!("{e:#}") }))
            }
        };

        self.print_json(&envelope(success, body))?;
        Ok(success)
    }

    async fn dispatch(&self) -> Result<(bool, Value)> {
        match &self.command {
            Commands::Remediate { event } => {
                let raw = read_input(event)?;
                let event: FailureEvent =
                    serde_json::from_str(&raw).context("Failed to parse failure event")?;
                self.execute_remediate(event).await
            }
            Commands::Hook { payload } => self.execute_hook(payload).await,
            Commands::Outcome {
                branch,
                status,
                pipeline_id,
            } => {
                let event = PipelineOutcomeEvent {
                    branch: branch.clone(),
                    status: PipelineStatus::from(status.as_str()),
                    pipeline_id: *pipeline_id,
                };
                self.execute_outcome(&event).await
            }
            Commands::Publish { id } => self.execute_publish(id).await,
            Commands::Rerun { id } => self.execute_rerun(id).await,
            Commands::Status { id, .. } => {
                let store = self.open_store()?;
                let body = match id {
                    Some(id) => json!({ "incident": store.get(id).await? }),
                    None => json!({ "incidents": store.list().await }),
                };
                Ok((true, body))
            }
            Commands::Validate { diff } => {
                let validation = diff::validate(&read_input(diff)?);
                Ok((validation.ok, serde_json::to_value(validation)?))
            }
            Commands::Apply { diff, original } => {
                let parsed = diff::parse(&read_input(diff)?).context("Diff failed validation")?;
                let content = std::fs::read_to_string(original)
                    .with_context(|| format!("Failed to read {}", original.display()))?;
                let patched = diff::apply_patch(&content, &parsed)?;
                Ok((true, json!({ "content": patched })))
            }
        }
    }

    async fn execute_remediate(&self, event: FailureEvent) -> Result<(bool, Value)> {
        let remediator = self.remediator()?;
        info!("Remediating failed pipeline {}", event.pipeline_id);

        let progress = StepProgress::start("Diagnosing failure and generating a fix");
        let (incident, outcome) = remediator.ingest_failure(event).await?;
        let success = !matches!(outcome, AutomationOutcome::Failed { .. });
        if success {
            progress.finish("Automation finished");
        } else {
            progress.fail("Automation failed");
        }

        Ok((
            success,
            json!({ "incidentId": incident.id, "result": outcome, "incident": incident }),
        ))
    }

    async fn execute_hook(&self, payload: &str) -> Result<(bool, Value)> {
        let raw = read_input(payload)?;
        let payload: Value = serde_json::from_str(&raw).context("Failed to parse webhook payload")?;

        match parse_pipeline_hook(&payload)? {
            HookEvent::Failure(event) => self.execute_remediate(event).await,
            HookEvent::Outcome(event) => self.execute_outcome(&event).await,
            HookEvent::Ignored(reason) => {
                info!("Webhook ignored: {reason}");
                Ok((true, json!({ "ignored": reason })))
            }
        }
    }

    async fn execute_outcome(&self, event: &PipelineOutcomeEvent) -> Result<(bool, Value)> {
        let remediator = self.remediator()?;
        let outcome = remediator.handle_pipeline_outcome(event).await?;
        let success = !matches!(outcome, SelfHealOutcome::RetryFailed { .. });
        Ok((success, json!({ "branch": event.branch, "result": outcome })))
    }

    async fn execute_publish(&self, id: &str) -> Result<(bool, Value)> {
        let remediator = self.remediator()?;
        let change_request = remediator.publish(id).await?;
        Ok((true, json!({ "incidentId": id, "changeRequest": change_request })))
    }

    async fn execute_rerun(&self, id: &str) -> Result<(bool, Value)> {
        let remediator = self.remediator()?;

        let progress = StepProgress::start("Re-running automation");
        let outcome = remediator.run_automation(id).await?;
        let success = !matches!(outcome, AutomationOutcome::Failed { .. });
        if success {
            progress.finish("Automation finished");
        } else {
            progress.fail("Automation failed");
        }

        let incident = remediator.store().get(id).await?;
        Ok((success, json!({ "incidentId": id, "result": outcome, "incident": incident })))
    }

    async fn show_status(&self, id: Option<&str>) -> Result<()> {
        let store = self.open_store()?;
        match id {
            Some(id) => output::print_incident(&store.get(id).await?),
            None => output::print_incidents(&store.list().await),
        }
        Ok(())
    }

    fn remediator(&self) -> Result<Remediator> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(project) = &self.project {
            config.gitlab.project = Some(project.clone());
        }

        let token = self
            .token
            .as_deref()
            .or(config.gitlab.token.as_deref())
            .map(Token::from);
        if token.is_none() {
            warn!("No GitLab token configured, API calls will be unauthenticated");
        }

        let repository = GitLabRepository::from_config(&config.gitlab, &config.automation, token)
            .context("Failed to set up GitLab access")?;
        let project = repository.project().to_string();

        let gateway = Gateway::from_config(&config.ai);
        if gateway.provider_count() == 0 {
            warn!("No model provider has an API key, automation will run in safe mode");
        }

        Ok(Remediator::new(
            Arc::new(self.open_store()?),
            Arc::new(repository),
            gateway,
            config.automation,
            project,
            config.gitlab.default_ref,
        ))
    }

    fn open_store(&self) -> Result<IncidentStore> {
        let path = match &self.store {
            Some(path) => path.clone(),
            None => IncidentStore::default_path()?,
        };
        IncidentStore::open(&path)
            .with_context(|| format!("Failed to open incident store: {}", path.display()))
    }

    fn print_json(&self, value: &Value) -> Result<()> {
        let rendered = if self.pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };
        println!("{rendered}");
        Ok(())
    }
}

/// Merges `success` into a command's JSON body.
fn envelope(success: bool, body: Value) -> Value {
    let mut envelope = json!({ "success": success });
    if let (Value::Object(target), Value::Object(fields)) = (&mut envelope, body) {
        target.extend(fields);
    }
    envelope
}

fn read_input(source: &str) -> Result<String> {
    if source == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read stdin")?;
        return Ok(buffer);
    }

    std::fs::read_to_string(Path::new(source)).with_context(|| format!("Failed to read {source}"))
}
