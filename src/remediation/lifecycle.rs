use chrono::Utc;
use log::{error, info, warn};
use serde::Serialize;
use serde_json::json;

use super::snapshot::{select_context, target_paths};
use super::Remediator;
use crate::ai::{
    diagnosis_prompt, patch_prompt, recover_diagnosis, recover_diff, Diagnosis, GatewayReply,
    OutputMode,
};
use crate::diff;
use crate::error::Result;
use crate::events::{extract_error_snippet, FailureEvent};
use crate::incident::{
    Analysis, AnalysisStatus, Category, Incident, IncidentStatus, MrStatus, Patch, PatchState,
    PatchStatus, RiskTier,
};

const CI_CONFIG_PATH: &str = ".gitlab-ci.yml";
const EMPTY_PATCH: &str = "Empty patch";

/// Result of one automation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AutomationOutcome {
    /// Another run already holds the incident
    Skipped,
    /// A validated patch is stored and can be published
    PatchReady,
    /// The model produced no usable diff
    PatchRejected { reason: String },
    /// The patch was validated and its merge request opened
    Published { url: String },
    /// A step failed; running stages were marked failed
    Failed { error: String },
}

impl Remediator {
    /// Opens an incident for a failed pipeline and runs automation on it.
    ///
    /// Missing logs are fetched from the failed job and a missing CI
    /// configuration from the repository; either may end up empty.
    pub async fn ingest_failure(&self, event: FailureEvent) -> Result<(Incident, AutomationOutcome)> {
        let incident = self.open_incident(event).await?;
        let outcome = self.run_automation(&incident.id).await?;
        Ok((self.store.get(&incident.id).await?, outcome))
    }

    async fn open_incident(&self, event: FailureEvent) -> Result<Incident> {
        let mut incident = Incident::new(
            event.project.unwrap_or_else(|| self.project.clone()),
            event.pipeline_id,
        );
        let git_ref = self.base_ref(event.git_ref.as_deref()).to_string();

        let logs = match event.job_id {
            Some(job_id) if event.logs.trim().is_empty() => {
                self.repository.fetch_job_log(job_id).await.unwrap_or_else(|e| {
                    warn!("Could not fetch log of job {job_id}: {e}");
                    String::new()
                })
            }
            _ => event.logs,
        };

        let ci_config = if event.ci_config_text.trim().is_empty() {
            self.repository
                .get_file(CI_CONFIG_PATH, &git_ref)
                .await
                .unwrap_or_else(|e| {
                    warn!("No {CI_CONFIG_PATH} at {git_ref}: {e}");
                    String::new()
                })
        } else {
            event.ci_config_text
        };

        incident.error_snippet = event
            .error_snippet
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| extract_error_snippet(&logs));
        incident.pipeline_url = event
            .pipeline_url
            .or_else(|| self.repository.pipeline_web_url(event.pipeline_id));
        incident.job_id = event.job_id;
        incident.job_name = event.job_name;
        incident.commit_sha = event.commit_sha;
        incident.git_ref = Some(git_ref);
        incident.project_metadata = event.project_metadata;
        incident.logs = logs;
        incident.ci_config = ci_config;

        self.store.insert(incident.clone()).await?;
        info!(
            "Incident {} opened for pipeline {} of {}",
            incident.id, incident.pipeline_id, incident.project
        );

        Ok(incident)
    }

    /// Runs at most one automation pass for an existing incident.
    ///
    /// Never leaves a stage `running`: any failure is recorded on the
    /// incident and reported as [`AutomationOutcome::Failed`].
    ///
    /// # Errors
    ///
    /// Returns an error only if the incident does not exist or the store
    /// cannot be written.
    pub async fn run_automation(&self, id: &str) -> Result<AutomationOutcome> {
        if !self.store.try_begin_automation(id).await? {
            warn!("[AUTO] Incident {id} is already being processed");
            return Ok(AutomationOutcome::Skipped);
        }

        let outcome = match self.automate(id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("[AUTO] Automation for {id} failed: {e}");
                let message = e.to_string();
                let ceiling = self.settings.max_retries;
                self.store
                    .update(id, |incident| {
                        if incident.analysis_status == AnalysisStatus::Running {
                            incident.analysis_status = AnalysisStatus::Failed;
                        }
                        if incident.patch_status == PatchStatus::Running {
                            incident.patch_status = PatchStatus::Failed;
                        }
                        if incident.retry_count < ceiling {
                            incident.retry_count += 1;
                        }
                        if incident.retry_count >= ceiling {
                            warn!("[AUTO] Retry limit of {ceiling} reached for {id}");
                            incident.mr_status = MrStatus::Failed;
                        }
                        incident.last_error = Some(message.clone());
                    })
                    .await?;
                return Ok(AutomationOutcome::Failed { error: message });
            }
        };

        if outcome == AutomationOutcome::PatchReady && self.settings.auto_publish {
            return Ok(match self.publish(id).await {
                Ok(change_request) => AutomationOutcome::Published {
                    url: change_request.url,
                },
                Err(e) => {
                    warn!("[AUTO] Auto-publish for {id} failed: {e}");
                    AutomationOutcome::PatchReady
                }
            });
        }

        Ok(outcome)
    }

    async fn automate(&self, id: &str) -> Result<AutomationOutcome> {
        let incident = self.store.get(id).await?;

        info!("[AUTO] Diagnosing incident {id}");
        let analysis = self.diagnose(&incident).await;

        let incident = self
            .store
            .update(id, |incident| {
                incident.analysis_status = AnalysisStatus::Done;
                if incident.category.is_none() {
                    incident.category = Some(analysis.category);
                }
                incident.analysis = Some(analysis);
                incident.patch_status = PatchStatus::Running;
            })
            .await?;

        info!("[AUTO] Generating patch for incident {id}");
        let git_ref = self.base_ref(incident.git_ref.as_deref()).to_string();
        let patch = self.generate_patch(&incident, &git_ref).await?;

        let ready = patch.is_valid();
        let rejection = patch.validation_error.clone();

        self.store
            .update(id, |incident| {
                if ready {
                    incident.patch_status = PatchStatus::Ready;
                    incident.status = IncidentStatus::InProgress;
                } else {
                    incident.patch_status = PatchStatus::Failed;
                }
                incident.patch = Some(patch);
            })
            .await?;

        if ready {
            info!("[AUTO] Patch for {id} validated and ready for a merge request");
            Ok(AutomationOutcome::PatchReady)
        } else {
            Ok(AutomationOutcome::PatchRejected {
                reason: rejection.unwrap_or_else(|| EMPTY_PATCH.to_string()),
            })
        }
    }

    async fn diagnose(&self, incident: &Incident) -> Analysis {
        let metadata = json!({
            "pipelineId": incident.pipeline_id,
            "ref": incident.git_ref,
            "jobName": incident.job_name,
            "project": incident.project,
            "projectMetadata": incident.project_metadata,
        });
        let prompt = diagnosis_prompt(&incident.logs, &incident.ci_config, &metadata);

        let (diagnosis, provider, safe_mode) = match self.gateway.invoke(&prompt, OutputMode::Structured).await {
            GatewayReply::Text { provider, text } => (recover_diagnosis(&text), Some(provider), false),
            GatewayReply::SafeMode => (Diagnosis::unavailable(), None, true),
        };

        Analysis {
            summary: diagnosis.summary,
            root_cause: diagnosis.root_cause,
            category: Category::parse_lenient(&diagnosis.category),
            confidence: diagnosis.confidence,
            failing_file: diagnosis.failing_file,
            provider,
            safe_mode,
            created_at: Utc::now(),
        }
    }

    /// Asks the model for a fix against the files at `git_ref` and runs it
    /// through the diff grammar check.
    ///
    /// The returned patch is `valid` only if it parsed; otherwise it carries
    /// the rejection reason. The previous patch's diff and the current
    /// analysis travel in the prompt metadata.
    pub(super) async fn generate_patch(&self, incident: &Incident, git_ref: &str) -> Result<Patch> {
        let snapshot = self.repository.list_files(git_ref).await?;
        let failing_file = incident
            .analysis
            .as_ref()
            .and_then(|analysis| analysis.failing_file.as_deref());
        let context = select_context(&snapshot, failing_file, self.settings.max_context_files);

        let metadata = json!({
            "pipelineId": incident.pipeline_id,
            "ref": git_ref,
            "previousPatch": incident.patch.as_ref().map(|patch| patch.diff.as_str()),
            "rca": incident.analysis,
        });
        let prompt = patch_prompt(
            &incident.logs,
            &incident.ci_config,
            &metadata,
            &context,
            &target_paths(&snapshot),
        );

        let (text, provider) = match self.gateway.invoke(&prompt, OutputMode::Diff).await {
            GatewayReply::Text { provider, text } => (Some(text), Some(provider)),
            GatewayReply::SafeMode => (None, None),
        };
        let safe_mode = text.is_none();
        let diff_text = text.as_deref().and_then(recover_diff);

        let validation_error = match diff_text.as_deref() {
            None => Some(EMPTY_PATCH.to_string()),
            Some(candidate) => diff::parse(candidate).err().map(|e| e.to_string()),
        };

        if let Some(reason) = &validation_error {
            warn!("[AUTO] Patch for {} rejected: {reason}", incident.id);
        }

        let valid = validation_error.is_none();
        let description = incident.analysis.as_ref().map_or_else(
            || "Generated fix".to_string(),
            |analysis| format!("Fix for: {}", analysis.summary),
        );

        Ok(Patch {
            diff: diff_text.unwrap_or_default(),
            description,
            risk: if valid { RiskTier::Medium } else { RiskTier::High },
            provider,
            safe_mode,
            validation_error,
            status: if valid { PatchState::Valid } else { PatchState::Failed },
            previous_attempt: false,
            created_at: Utc::now(),
        })
    }
}
