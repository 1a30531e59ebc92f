use log::{error, info, warn};
use serde::Serialize;

use super::Remediator;
use crate::diff;
use crate::error::Result;
use crate::events::{PipelineOutcomeEvent, PipelineStatus};
use crate::incident::{incident_id_from_branch, Incident, IncidentStatus, MrStatus, PatchStatus};
use crate::store::RetryClaim;

/// What a pipeline outcome on a remediation branch led to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SelfHealOutcome {
    /// Not a remediation branch, or no incident behind it
    Ignored { reason: String },
    /// Fix pipeline passed; the incident is resolved
    Resolved { duplicates_removed: usize },
    /// A regenerated fix was committed to the branch
    RetryCommitted { attempt: u32 },
    /// The regenerated fix was empty or malformed
    RetryRejected { attempt: u32, reason: String },
    /// The retry ceiling was already reached
    RetryExhausted { attempts: u32 },
    /// Another run already holds the incident
    Skipped,
    /// A step of the retry failed
    RetryFailed { error: String },
    /// Status needs no action (running, pending, canceled, ...)
    NoOp { status: String },
}

impl Remediator {
    /// Reacts to a pipeline that ran on a remediation branch.
    ///
    /// Success resolves the incident. Failure regenerates a fix and commits
    /// it to the same branch, at most `max-retries` times per incident and
    /// never while another run holds the incident.
    /// Failures inside a retry are recorded on the incident rather than
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store cannot be written.
    pub async fn handle_pipeline_outcome(&self, event: &PipelineOutcomeEvent) -> Result<SelfHealOutcome> {
        let Some(id) = incident_id_from_branch(&event.branch) else {
            return Ok(SelfHealOutcome::Ignored {
                reason: format!("{} is not a remediation branch", event.branch),
            });
        };

        let Some(incident) = self.store.find(id).await else {
            warn!("[HEAL] No incident {id} for branch {}", event.branch);
            return Ok(SelfHealOutcome::Ignored {
                reason: format!("unknown incident {id}"),
            });
        };

        info!("[HEAL] Pipeline on {} finished: {:?}", event.branch, event.status);

        match &event.status {
            PipelineStatus::Success => self.resolve(&incident).await,
            PipelineStatus::Failed => self.retry(incident, event).await,
            PipelineStatus::Other(status) => Ok(SelfHealOutcome::NoOp {
                status: status.clone(),
            }),
        }
    }

    async fn resolve(&self, incident: &Incident) -> Result<SelfHealOutcome> {
        let resolved = self
            .store
            .update(&incident.id, |incident| {
                incident.status = IncidentStatus::Resolved;
                incident.mr_status = MrStatus::Resolved;
            })
            .await?;
        info!("[HEAL] Fix pipeline passed, incident {} resolved", resolved.id);

        let duplicates_removed = if self.settings.dedupe_on_success {
            self.store
                .remove_duplicates(&resolved.id, resolved.category, &resolved.error_snippet)
                .await?
        } else {
            0
        };

        Ok(SelfHealOutcome::Resolved { duplicates_removed })
    }

    async fn retry(&self, incident: Incident, event: &PipelineOutcomeEvent) -> Result<SelfHealOutcome> {
        let ceiling = self.settings.max_retries;

        let incident = match self.store.try_begin_retry(&incident.id, ceiling).await? {
            RetryClaim::Claimed(incident) => incident,
            RetryClaim::Busy => {
                warn!("[HEAL] Incident {} is already being processed", incident.id);
                return Ok(SelfHealOutcome::Skipped);
            }
            RetryClaim::Exhausted { attempts } => {
                warn!("[HEAL] Retry limit of {ceiling} reached for {}", incident.id);
                self.store
                    .update(&incident.id, |incident| {
                        incident.mr_status = MrStatus::Failed;
                        incident.last_error = Some(format!("Retry limit of {ceiling} reached"));
                    })
                    .await?;
                return Ok(SelfHealOutcome::RetryExhausted { attempts });
            }
        };
        let attempt = incident.retry_count;
        info!("[HEAL] Retry {attempt}/{ceiling} for incident {}", incident.id);

        match self.regenerate(incident.clone(), event, attempt).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!("[HEAL] Retry for {} failed: {e}", incident.id);
                let message = e.to_string();
                self.store
                    .update(&incident.id, |incident| {
                        incident.mr_status = MrStatus::Failed;
                        if incident.patch_status == PatchStatus::Running {
                            incident.patch_status = PatchStatus::Failed;
                        }
                        incident.last_error = Some(message.clone());
                    })
                    .await?;
                Ok(SelfHealOutcome::RetryFailed { error: message })
            }
        }
    }

    async fn regenerate(
        &self,
        incident: Incident,
        event: &PipelineOutcomeEvent,
        attempt: u32,
    ) -> Result<SelfHealOutcome> {
        let logs = self.failing_job_log(&incident, event.pipeline_id).await;
        let incident = self
            .store
            .update(&incident.id, |incident| incident.logs = logs)
            .await?;

        let mut patch = self.generate_patch(&incident, &event.branch).await?;

        if let Some(reason) = patch.validation_error.clone() {
            warn!("[HEAL] Regenerated patch for {} rejected: {reason}", incident.id);
            patch.previous_attempt = true;
            self.store
                .update(&incident.id, |incident| {
                    incident.patch = Some(patch);
                    incident.patch_status = PatchStatus::Failed;
                    incident.mr_status = MrStatus::Failed;
                    incident.last_error = Some(reason.clone());
                })
                .await?;
            return Ok(SelfHealOutcome::RetryRejected { attempt, reason });
        }

        let parsed = diff::parse(&patch.diff)?;
        self.apply_and_commit(
            &event.branch,
            &parsed,
            &format!("fix(ci): retry #{attempt} for incident {}", incident.id),
        )
        .await?;

        self.store
            .update(&incident.id, |incident| {
                incident.patch = Some(patch);
                incident.patch_status = PatchStatus::Ready;
                incident.mr_status = MrStatus::Open;
                incident.last_error = None;
            })
            .await?;
        info!("[HEAL] Committed retry patch to {}", event.branch);

        Ok(SelfHealOutcome::RetryCommitted { attempt })
    }

    /// Log of the first failed job of the fix pipeline.
    ///
    /// Falls back to the stored logs when there is no pipeline, no failed
    /// job, or the provider cannot be reached.
    async fn failing_job_log(&self, incident: &Incident, pipeline_id: Option<u64>) -> String {
        let Some(pipeline_id) = pipeline_id else {
            return incident.logs.clone();
        };

        let jobs = match self.repository.fetch_pipeline_jobs(pipeline_id).await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!("[HEAL] Could not list jobs of pipeline {pipeline_id}: {e}");
                return incident.logs.clone();
            }
        };

        let Some(job) = jobs.iter().find(|job| job.is_failed()) else {
            return incident.logs.clone();
        };

        info!("[HEAL] Using log of failed job {} ({})", job.name, job.id);
        self.repository.fetch_job_log(job.id).await.unwrap_or_else(|e| {
            warn!("[HEAL] Could not fetch log of job {}: {e}", job.id);
            incident.logs.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AutomationConfig;
    use crate::incident::{Category, Patch, PatchState, RiskTier};
    use crate::providers::PipelineJob;
    use crate::remediation::testing::{remediator, FakeRepository, CI_CONFIG, FIX_DIFF};
    use chrono::Utc;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    const ID: &str = "01hfixture";
    const BRANCH: &str = "incident-fix-01hfixture";
    const BRANCH_CONFIG: &str = "image: node:20\ntest:\n  script:\n    - npm test\n";
    const RETRY_DIFF: &str = "diff --git a/.gitlab-ci.yml b/.gitlab-ci.yml\n--- a/.gitlab-ci.yml\n+++ b/.gitlab-ci.yml\n@@ -3,2 +3,3 @@\n   script:\n+    - npm ci\n     - npm test\n";

    fn incident_with_open_mr() -> Incident {
        let mut incident = Incident::new("group/app", 77);
        incident.id = ID.to_string();
        incident.git_ref = Some("main".to_string());
        incident.logs = "original failure".to_string();
        incident.mr_status = MrStatus::Open;
        incident.category = Some(Category::Config);
        incident.error_snippet = "Error: node 16".to_string();
        incident.patch = Some(Patch {
            diff: FIX_DIFF.to_string(),
            description: "Fix for: Node too old".to_string(),
            risk: RiskTier::Medium,
            provider: Some("scripted".to_string()),
            safe_mode: false,
            validation_error: None,
            status: PatchState::Valid,
            previous_attempt: false,
            created_at: Utc::now(),
        });
        incident
    }

    fn branch_repository() -> Arc<FakeRepository> {
        Arc::new(
            FakeRepository::default()
                .with_file("main", ".gitlab-ci.yml", CI_CONFIG)
                .with_file(BRANCH, ".gitlab-ci.yml", BRANCH_CONFIG),
        )
    }

    fn failed(pipeline_id: Option<u64>) -> PipelineOutcomeEvent {
        PipelineOutcomeEvent {
            branch: BRANCH.to_string(),
            status: PipelineStatus::Failed,
            pipeline_id,
        }
    }

    #[tokio::test]
    async fn foreign_branch_is_ignored() {
        let (remediator, _) = remediator(branch_repository(), &[], AutomationConfig::default());
        let event = PipelineOutcomeEvent {
            branch: "main".to_string(),
            status: PipelineStatus::Failed,
            pipeline_id: Some(1),
        };
        assert!(matches!(
            remediator.handle_pipeline_outcome(&event).await.unwrap(),
            SelfHealOutcome::Ignored { .. }
        ));
    }

    #[tokio::test]
    async fn unknown_incident_is_ignored() {
        let (remediator, _) = remediator(branch_repository(), &[], AutomationConfig::default());
        assert!(matches!(
            remediator.handle_pipeline_outcome(&failed(None)).await.unwrap(),
            SelfHealOutcome::Ignored { .. }
        ));
    }

    #[tokio::test]
    async fn success_resolves_and_removes_duplicates() {
        let (remediator, _) = remediator(branch_repository(), &[], AutomationConfig::default());
        let incident = incident_with_open_mr();
        let mut duplicate = incident.clone();
        duplicate.id = "01hduplicate".to_string();
        duplicate.mr_status = MrStatus::NotRequested;
        remediator.store().insert(incident).await.unwrap();
        remediator.store().insert(duplicate).await.unwrap();

        let event = PipelineOutcomeEvent {
            branch: BRANCH.to_string(),
            status: PipelineStatus::Success,
            pipeline_id: Some(2),
        };
        let outcome = remediator.handle_pipeline_outcome(&event).await.unwrap();

        assert_eq!(outcome, SelfHealOutcome::Resolved { duplicates_removed: 1 });
        let stored = remediator.store().get(ID).await.unwrap();
        assert_eq!(stored.status, IncidentStatus::Resolved);
        assert_eq!(stored.mr_status, MrStatus::Resolved);
        assert!(remediator.store().find("01hduplicate").await.is_none());
    }

    #[tokio::test]
    async fn success_keeps_duplicates_when_dedupe_disabled() {
        let settings = AutomationConfig {
            dedupe_on_success: false,
            ..AutomationConfig::default()
        };
        let (remediator, _) = remediator(branch_repository(), &[], settings);
        let incident = incident_with_open_mr();
        let mut duplicate = incident.clone();
        duplicate.id = "01hduplicate".to_string();
        remediator.store().insert(incident).await.unwrap();
        remediator.store().insert(duplicate).await.unwrap();

        let event = PipelineOutcomeEvent {
            branch: BRANCH.to_string(),
            status: PipelineStatus::Success,
            pipeline_id: None,
        };
        assert_eq!(
            remediator.handle_pipeline_outcome(&event).await.unwrap(),
            SelfHealOutcome::Resolved { duplicates_removed: 0 }
        );
        assert!(remediator.store().find("01hduplicate").await.is_some());
    }

    #[tokio::test]
    async fn failure_commits_regenerated_fix_to_branch() {
        let repository = branch_repository();
        repository.jobs.lock().unwrap().extend([
            PipelineJob {
                id: 8,
                name: "build".to_string(),
                status: "success".to_string(),
            },
            PipelineJob {
                id: 9,
                name: "test".to_string(),
                status: "failed".to_string(),
            },
        ]);
        repository
            .job_logs
            .lock()
            .unwrap()
            .insert(9, "npm ERR! missing node_modules".to_string());
        let (remediator, _) = remediator(Arc::clone(&repository), &[RETRY_DIFF], AutomationConfig::default());
        remediator.store().insert(incident_with_open_mr()).await.unwrap();

        let outcome = remediator.handle_pipeline_outcome(&failed(Some(42))).await.unwrap();

        assert_eq!(outcome, SelfHealOutcome::RetryCommitted { attempt: 1 });
        let stored = remediator.store().get(ID).await.unwrap();
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.mr_status, MrStatus::Open);
        assert_eq!(stored.patch_status, PatchStatus::Ready);
        assert_eq!(stored.logs, "npm ERR! missing node_modules");
        assert_eq!(stored.patch.unwrap().diff, RETRY_DIFF);

        let commits = repository.commits();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].branch, BRANCH);
        assert_eq!(
            commits[0].content,
            "image: node:20\ntest:\n  script:\n    - npm ci\n    - npm test\n"
        );
    }

    #[tokio::test]
    async fn retry_ceiling_stops_regeneration() {
        let junk = "this is not a diff at all";
        let (remediator, calls) = remediator(
            branch_repository(),
            &[junk, junk, junk, RETRY_DIFF],
            AutomationConfig::default(),
        );
        remediator.store().insert(incident_with_open_mr()).await.unwrap();

        let mut outcomes = Vec::new();
        for _ in 0..4 {
            outcomes.push(remediator.handle_pipeline_outcome(&failed(None)).await.unwrap());
        }

        assert!(matches!(outcomes[0], SelfHealOutcome::RetryRejected { attempt: 1, .. }));
        assert!(matches!(outcomes[2], SelfHealOutcome::RetryRejected { attempt: 3, .. }));
        assert_eq!(outcomes[3], SelfHealOutcome::RetryExhausted { attempts: 3 });
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let stored = remediator.store().get(ID).await.unwrap();
        assert_eq!(stored.retry_count, 3);
        assert_eq!(stored.mr_status, MrStatus::Failed);
        assert!(stored.patch.unwrap().previous_attempt);
    }

    #[tokio::test]
    async fn rejected_regeneration_marks_previous_attempt() {
        let (remediator, _) = remediator(branch_repository(), &[], AutomationConfig::default());
        remediator.store().insert(incident_with_open_mr()).await.unwrap();

        let outcome = remediator.handle_pipeline_outcome(&failed(None)).await.unwrap();

        assert_eq!(
            outcome,
            SelfHealOutcome::RetryRejected {
                attempt: 1,
                reason: "Empty patch".to_string()
            }
        );
        let stored = remediator.store().get(ID).await.unwrap();
        assert_eq!(stored.mr_status, MrStatus::Failed);
        assert_eq!(stored.patch_status, PatchStatus::Failed);
        let patch = stored.patch.unwrap();
        assert!(patch.previous_attempt);
        assert!(patch.safe_mode);
        assert_eq!(patch.validation_error.as_deref(), Some("Empty patch"));
    }

    #[tokio::test]
    async fn error_during_retry_is_recorded() {
        // Branch was never created, so the target file cannot be fetched.
        let repository = Arc::new(FakeRepository::default().with_file("main", ".gitlab-ci.yml", CI_CONFIG));
        let (remediator, _) = remediator(repository, &[FIX_DIFF], AutomationConfig::default());
        remediator.store().insert(incident_with_open_mr()).await.unwrap();

        let outcome = remediator.handle_pipeline_outcome(&failed(None)).await.unwrap();

        assert!(matches!(outcome, SelfHealOutcome::RetryFailed { .. }));
        let stored = remediator.store().get(ID).await.unwrap();
        assert_eq!(stored.mr_status, MrStatus::Failed);
        assert_eq!(stored.retry_count, 1);
        assert!(stored.last_error.is_some());
        assert!(!stored.is_running());
    }

    #[tokio::test]
    async fn failure_while_incident_is_running_is_skipped() {
        let repository = branch_repository();
        let (remediator, calls) = remediator(Arc::clone(&repository), &[RETRY_DIFF], AutomationConfig::default());
        let mut incident = incident_with_open_mr();
        incident.patch_status = PatchStatus::Running;
        remediator.store().insert(incident).await.unwrap();

        let outcome = remediator.handle_pipeline_outcome(&failed(None)).await.unwrap();

        assert_eq!(outcome, SelfHealOutcome::Skipped);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(repository.commits().is_empty());
        let stored = remediator.store().get(ID).await.unwrap();
        assert_eq!(stored.retry_count, 0);
        assert_eq!(stored.mr_status, MrStatus::Open);
    }

    #[tokio::test]
    async fn overlapping_failures_commit_one_retry() {
        let repository = branch_repository();
        *repository.listing_delay.lock().unwrap() = Some(Duration::from_millis(50));
        let (remediator, calls) = remediator(
            Arc::clone(&repository),
            &[RETRY_DIFF, RETRY_DIFF],
            AutomationConfig::default(),
        );
        remediator.store().insert(incident_with_open_mr()).await.unwrap();

        let first = failed(Some(42));
        let second = failed(Some(43));
        let (a, b) = tokio::join!(
            remediator.handle_pipeline_outcome(&first),
            remediator.handle_pipeline_outcome(&second)
        );
        let mut outcomes = vec![a.unwrap(), b.unwrap()];
        outcomes.sort_by_key(|outcome| outcome == &SelfHealOutcome::Skipped);

        assert_eq!(
            outcomes,
            vec![SelfHealOutcome::RetryCommitted { attempt: 1 }, SelfHealOutcome::Skipped]
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(repository.commits().len(), 1);
        assert_eq!(remediator.store().get(ID).await.unwrap().retry_count, 1);
    }

    #[tokio::test]
    async fn unreachable_job_log_falls_back_to_stored_logs() {
        let repository = branch_repository();
        repository.jobs.lock().unwrap().push(PipelineJob {
            id: 9,
            name: "test".to_string(),
            status: "failed".to_string(),
        });
        let (remediator, _) = remediator(Arc::clone(&repository), &[RETRY_DIFF], AutomationConfig::default());
        remediator.store().insert(incident_with_open_mr()).await.unwrap();

        let outcome = remediator.handle_pipeline_outcome(&failed(Some(42))).await.unwrap();

        assert_eq!(outcome, SelfHealOutcome::RetryCommitted { attempt: 1 });
        let stored = remediator.store().get(ID).await.unwrap();
        assert_eq!(stored.logs, "original failure");
        assert_eq!(stored.last_error, None);
        assert_eq!(repository.commits().len(), 1);
    }

    #[tokio::test]
    async fn running_pipeline_is_a_no_op() {
        let (remediator, calls) = remediator(branch_repository(), &[RETRY_DIFF], AutomationConfig::default());
        remediator.store().insert(incident_with_open_mr()).await.unwrap();

        let event = PipelineOutcomeEvent {
            branch: BRANCH.to_string(),
            status: PipelineStatus::Other("running".to_string()),
            pipeline_id: Some(3),
        };

        assert_eq!(
            remediator.handle_pipeline_outcome(&event).await.unwrap(),
            SelfHealOutcome::NoOp {
                status: "running".to_string()
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(remediator.store().get(ID).await.unwrap().retry_count, 0);
    }
}
