use log::{error, info};

use super::Remediator;
use crate::diff::{self, apply_file_patch, UnifiedDiff};
use crate::error::{PipefixError, Result};
use crate::incident::{ChangeRequest, ChangeRequestStatus, Incident, MrStatus, PatchState, PatchStatus};

impl Remediator {
    /// Opens the merge request for an incident's validated patch.
    ///
    /// Creates `incident-fix-<id>` from the incident's ref, applies the diff
    /// to the files on that branch, commits the results and opens the merge
    /// request back into the ref.
    ///
    /// # Errors
    ///
    /// Fails without side effects if the incident has no valid patch or a
    /// merge request is already open. Any later failure is also recorded on
    /// the incident (`mrStatus=failed`); a diff that does not apply to the
    /// branch also marks the patch failed.
    pub async fn publish(&self, id: &str) -> Result<ChangeRequest> {
        let incident = self.store.get(id).await?;

        if incident.change_request.is_some() && matches!(incident.mr_status, MrStatus::Open | MrStatus::Fixing) {
            return Err(PipefixError::ChangeRequestAlreadyOpen(id.to_string()));
        }

        let diff_text = incident
            .patch
            .as_ref()
            .filter(|patch| patch.is_valid())
            .map(|patch| patch.diff.clone())
            .ok_or_else(|| PipefixError::NoValidPatch(id.to_string()))?;

        match self.open_change_request(&incident, &diff_text).await {
            Ok(change_request) => {
                info!("Merge request opened for {id}: {}", change_request.url);
                self.store
                    .update(id, |incident| {
                        incident.change_request = Some(change_request.clone());
                        incident.mr_status = MrStatus::Open;
                        incident.last_error = None;
                    })
                    .await?;
                Ok(change_request)
            }
            Err(e) => {
                error!("Publishing fix for {id} failed: {e}");
                let message = e.to_string();
                let patch_rejected = matches!(e, PipefixError::Apply(_));
                self.store
                    .update(id, |incident| {
                        incident.mr_status = MrStatus::Failed;
                        if patch_rejected {
                            incident.patch_status = PatchStatus::Failed;
                            if let Some(patch) = incident.patch.as_mut() {
                                patch.status = PatchState::Failed;
                                patch.validation_error = Some(message.clone());
                            }
                        }
                        incident.last_error = Some(message);
                    })
                    .await?;
                Err(e)
            }
        }
    }

    async fn open_change_request(&self, incident: &Incident, diff_text: &str) -> Result<ChangeRequest> {
        let diff = diff::parse(diff_text)?;
        let base = self.base_ref(incident.git_ref.as_deref()).to_string();
        let branch = incident.branch_name();

        self.repository.create_branch(&branch, &base).await?;
        self.apply_and_commit(
            &branch,
            &diff,
            &format!("fix(ci): automated remediation for incident {}", incident.id),
        )
        .await?;

        let merge_request = self
            .repository
            .create_change_request(&branch, &base, &title(incident), &self.description(incident))
            .await?;

        Ok(ChangeRequest {
            branch: branch.clone(),
            external_id: merge_request.id,
            url: merge_request.url,
            source_branch: branch,
            target_branch: base,
            status: change_request_status(&merge_request.status),
        })
    }

    /// Applies every file patch against `branch` and commits the results.
    ///
    /// All files are patched before the first commit, so a context mismatch
    /// leaves the branch untouched.
    pub(super) async fn apply_and_commit(&self, branch: &str, diff: &UnifiedDiff, message: &str) -> Result<usize> {
        let mut changes = Vec::with_capacity(diff.files.len());

        for file in &diff.files {
            let original = if file.is_new {
                String::new()
            } else {
                self.repository.get_file(&file.old_path, branch).await?
            };
            changes.push((file, apply_file_patch(&original, file)?));
        }

        for (file, content) in &changes {
            self.repository
                .commit_file(branch, file.target_path(), content, message, file.is_new)
                .await?;
        }

        info!("Committed {} file(s) to {branch}", changes.len());
        Ok(changes.len())
    }
}

fn title(incident: &Incident) -> String {
    match &incident.analysis {
        Some(analysis) if !analysis.summary.is_empty() => format!(
            "Fix CI failure in pipeline #{}: {}",
            incident.pipeline_id,
            crate::ai::truncate_chars(&analysis.summary, 120)
        ),
        _ => format!("Fix CI failure in pipeline #{}", incident.pipeline_id),
    }
}

impl Remediator {
    fn description(&self, incident: &Incident) -> String {
        let mut body = format!("Automated fix for incident `{}`.\n", incident.id);

        if let Some(url) = &incident.pipeline_url {
            body.push_str(&format!("\nFailed pipeline: {url}\n"));
        }
        if let Some(url) = incident.job_id.and_then(|id| self.repository.job_web_url(id)) {
            body.push_str(&format!("Failed job: {url}\n"));
        }

        if let Some(analysis) = &incident.analysis {
            body.push_str(&format!(
                "\n### Root cause\n\n{}\n\n{}\n\n- Category: `{}`\n- Confidence: {:.0}%\n",
                analysis.summary,
                analysis.root_cause,
                analysis.category.as_str(),
                analysis.confidence * 100.0
            ));
        }

        if let Some(patch) = &incident.patch {
            body.push_str(&format!("\n### Patch\n\n{}\n", patch.description));
        }

        body
    }
}

fn change_request_status(state: &str) -> ChangeRequestStatus {
    match state {
        "merged" => ChangeRequestStatus::Merged,
        "closed" | "locked" => ChangeRequestStatus::Closed,
        _ => ChangeRequestStatus::Open,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AutomationConfig;
    use crate::diff::ApplyError;
    use crate::incident::{Patch, RiskTier};
    use crate::remediation::testing::{remediator, FakeRepository, CI_CONFIG, FIX_DIFF};
    use chrono::Utc;
    use std::sync::Arc;

    fn patch(diff: &str, status: PatchState) -> Patch {
        Patch {
            diff: diff.to_string(),
            description: "Fix for: Node too old".to_string(),
            risk: RiskTier::Medium,
            provider: Some("scripted".to_string()),
            safe_mode: false,
            validation_error: None,
            status,
            previous_attempt: false,
            created_at: Utc::now(),
        }
    }

    async fn seeded(repository: Arc<FakeRepository>, diff: &str, status: PatchState) -> (Remediator, String) {
        let (remediator, _) = remediator(repository, &[], AutomationConfig::default());
        let mut incident = Incident::new("group/app", 77);
        incident.git_ref = Some("main".to_string());
        incident.patch = Some(patch(diff, status));
        let id = incident.id.clone();
        remediator.store().insert(incident).await.unwrap();
        (remediator, id)
    }

    #[tokio::test]
    async fn publish_commits_patched_file_and_opens_merge_request() {
        let repository = Arc::new(FakeRepository::default().with_file("main", ".gitlab-ci.yml", CI_CONFIG));
        let (remediator, id) = seeded(Arc::clone(&repository), FIX_DIFF, PatchState::Valid).await;

        let change_request = remediator.publish(&id).await.unwrap();

        assert_eq!(change_request.branch, format!("incident-fix-{id}"));
        assert_eq!(change_request.target_branch, "main");
        assert_eq!(change_request.status, ChangeRequestStatus::Open);
        assert_eq!(change_request.external_id, 1);

        let commits = repository.commits();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].path, ".gitlab-ci.yml");
        assert_eq!(commits[0].content, CI_CONFIG.replace("node:16", "node:20"));
        assert!(!commits[0].is_new);

        let stored = remediator.store().get(&id).await.unwrap();
        assert_eq!(stored.mr_status, MrStatus::Open);
        assert_eq!(stored.change_request, Some(change_request));
    }

    #[tokio::test]
    async fn second_publish_is_refused() {
        let repository = Arc::new(FakeRepository::default().with_file("main", ".gitlab-ci.yml", CI_CONFIG));
        let (remediator, id) = seeded(repository, FIX_DIFF, PatchState::Valid).await;

        remediator.publish(&id).await.unwrap();
        assert!(matches!(
            remediator.publish(&id).await,
            Err(PipefixError::ChangeRequestAlreadyOpen(_))
        ));
    }

    #[tokio::test]
    async fn failed_patch_cannot_be_published() {
        let (remediator, id) = seeded(Arc::new(FakeRepository::default()), FIX_DIFF, PatchState::Failed).await;

        assert!(matches!(
            remediator.publish(&id).await,
            Err(PipefixError::NoValidPatch(_))
        ));
        let stored = remediator.store().get(&id).await.unwrap();
        assert_eq!(stored.mr_status, MrStatus::NotRequested);
    }

    #[tokio::test]
    async fn context_mismatch_is_recorded_and_nothing_committed() {
        let repository = Arc::new(FakeRepository::default().with_file("main", ".gitlab-ci.yml", "image: node:18\n"));
        let (remediator, id) = seeded(Arc::clone(&repository), FIX_DIFF, PatchState::Valid).await;

        let result = remediator.publish(&id).await;

        assert!(matches!(
            result,
            Err(PipefixError::Apply(ApplyError::ContextMismatch { .. }))
        ));
        assert!(repository.commits().is_empty());
        let stored = remediator.store().get(&id).await.unwrap();
        assert_eq!(stored.mr_status, MrStatus::Failed);
        assert_eq!(stored.patch_status, PatchStatus::Failed);
        assert!(stored.last_error.is_some());
        let patch = stored.patch.unwrap();
        assert_eq!(patch.status, PatchState::Failed);
        assert!(patch.validation_error.is_some());

        assert!(matches!(
            remediator.publish(&id).await,
            Err(PipefixError::NoValidPatch(_))
        ));
    }

    #[tokio::test]
    async fn provider_error_keeps_patch_publishable() {
        let repository = Arc::new(FakeRepository::default());
        let (remediator, id) = seeded(Arc::clone(&repository), FIX_DIFF, PatchState::Valid).await;

        assert!(remediator.publish(&id).await.is_err());

        let stored = remediator.store().get(&id).await.unwrap();
        assert_eq!(stored.mr_status, MrStatus::Failed);
        assert_eq!(stored.patch.unwrap().status, PatchState::Valid);
    }

    #[tokio::test]
    async fn new_file_patch_is_committed_as_create() {
        let diff = concat!(
            "diff --git a/.nvmrc b/.nvmrc\n",
            "new file mode 100644\n",
            "--- /dev/null\n",
            "+++ b/.nvmrc\n",
            "@@ -0,0 +1 @@\n",
            "+20\n",
        );
        let repository = Arc::new(FakeRepository::default());
        let (remediator, id) = seeded(Arc::clone(&repository), diff, PatchState::Valid).await;

        remediator.publish(&id).await.unwrap();

        let commits = repository.commits();
        assert_eq!(commits[0].path, ".nvmrc");
        assert_eq!(commits[0].content, "20\n");
        assert!(commits[0].is_new);
    }

    #[test]
    fn merge_request_states_map_to_status() {
        assert_eq!(change_request_status("opened"), ChangeRequestStatus::Open);
        assert_eq!(change_request_status("merged"), ChangeRequestStatus::Merged);
        assert_eq!(change_request_status("closed"), ChangeRequestStatus::Closed);
    }
}
