use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use indexmap::IndexMap;
use log::{debug, info};
use tokio::sync::Mutex;

use crate::error::{PipefixError, Result};
use crate::incident::{AnalysisStatus, Category, Incident, IncidentStatus, MrStatus, PatchStatus};

/// Result of claiming an incident for a self-heal retry.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryClaim {
    /// Retry counted and patch stage marked running; holds the record after the claim
    Claimed(Incident),
    /// An automation run or another retry holds the incident
    Busy,
    /// `retry_count` already reached the ceiling
    Exhausted { attempts: u32 },
}

/// Incident records keyed by id, in insertion order.
///
/// Every mutation happens under one async mutex and, when a file path is
/// set, is written through to a JSON file before the lock is released:
/// - Linux: `~/.cache/pipefix/incidents.json`
/// - macOS: `~/Library/Caches/pipefix/incidents.json`
pub struct IncidentStore {
    path: Option<PathBuf>,
    incidents: Mutex<IndexMap<String, Incident>>,
}

impl IncidentStore {
    /// Store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            incidents: Mutex::new(IndexMap::new()),
        }
    }

    /// Opens (or starts) a JSON-backed store at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed, or its
    /// directory cannot be created.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let incidents = if path.exists() {
            let content = fs::read_to_string(&path)?;
            let records: Vec<Incident> = serde_json::from_str(&content).map_err(|e| {
                PipefixError::Store(format!("Failed to parse {}: {e}", path.display()))
            })?;
            debug!("Loaded {} incidents from {}", records.len(), path.display());
            records.into_iter().map(|i| (i.id.clone(), i)).collect()
        } else {
            IndexMap::new()
        };

        info!("Incident store at: {}", path.display());

        Ok(Self {
            path: Some(path),
            incidents: Mutex::new(incidents),
        })
    }

    /// `<platform cache dir>/pipefix/incidents.json`
    ///
    /// # Errors
    ///
    /// Returns an error if the platform has no cache directory.
    pub fn default_path() -> Result<PathBuf> {
        Ok(dirs::cache_dir()
            .ok_or_else(|| PipefixError::Store("No cache directory found".into()))?
            .join("pipefix")
            .join("incidents.json"))
    }

    pub async fn insert(&self, incident: Incident) -> Result<()> {
        let mut incidents = self.incidents.lock().await;
        incidents.insert(incident.id.clone(), incident);
        self.persist(&incidents)
    }

    pub async fn get(&self, id: &str) -> Result<Incident> {
        self.find(id)
            .await
            .ok_or_else(|| PipefixError::IncidentNotFound(id.to_string()))
    }

    pub async fn find(&self, id: &str) -> Option<Incident> {
        self.incidents.lock().await.get(id).cloned()
    }

    /// All incidents, newest first.
    pub async fn list(&self) -> Vec<Incident> {
        let incidents = self.incidents.lock().await;
        incidents.values().rev().cloned().collect()
    }

    /// Applies `change` to one record, stamps `updated_at` and persists.
    ///
    /// Returns the record as stored after the change.
    pub async fn update<F>(&self, id: &str, change: F) -> Result<Incident>
    where
        F: FnOnce(&mut Incident),
    {
        let mut incidents = self.incidents.lock().await;
        let incident = incidents
            .get_mut(id)
            .ok_or_else(|| PipefixError::IncidentNotFound(id.to_string()))?;

        change(incident);
        incident.updated_at = Utc::now();
        let updated = incident.clone();

        self.persist(&incidents)?;
        Ok(updated)
    }

    /// Claims the incident for one automation run.
    ///
    /// Atomically checks that neither stage is running and marks analysis as
    /// running. Returns `false` if another run already holds it.
    pub async fn try_begin_automation(&self, id: &str) -> Result<bool> {
        let mut incidents = self.incidents.lock().await;
        let incident = incidents
            .get_mut(id)
            .ok_or_else(|| PipefixError::IncidentNotFound(id.to_string()))?;

        if incident.is_running() {
            debug!("Incident {id} already has an active run");
            return Ok(false);
        }

        incident.analysis_status = AnalysisStatus::Running;
        incident.last_error = None;
        incident.updated_at = Utc::now();

        self.persist(&incidents)?;
        Ok(true)
    }

    /// Claims the incident for one self-heal retry.
    ///
    /// Under the same lock as [`IncidentStore::try_begin_automation`]: an
    /// idle incident below `ceiling` gets its retry counted, its merge
    /// request marked fixing and its patch stage marked running.
    pub async fn try_begin_retry(&self, id: &str, ceiling: u32) -> Result<RetryClaim> {
        let mut incidents = self.incidents.lock().await;
        let incident = incidents
            .get_mut(id)
            .ok_or_else(|| PipefixError::IncidentNotFound(id.to_string()))?;

        if incident.is_running() {
            debug!("Incident {id} already has an active run");
            return Ok(RetryClaim::Busy);
        }
        if incident.retry_count >= ceiling {
            return Ok(RetryClaim::Exhausted {
                attempts: incident.retry_count,
            });
        }

        incident.retry_count += 1;
        incident.mr_status = MrStatus::Fixing;
        incident.patch_status = PatchStatus::Running;
        incident.last_error = None;
        incident.updated_at = Utc::now();
        let claimed = incident.clone();

        self.persist(&incidents)?;
        Ok(RetryClaim::Claimed(claimed))
    }

    /// Removes unresolved incidents other than `keep_id` that share the
    /// category and (non-empty) error snippet. Returns how many were removed.
    pub async fn remove_duplicates(
        &self,
        keep_id: &str,
        category: Option<Category>,
        error_snippet: &str,
    ) -> Result<usize> {
        if error_snippet.trim().is_empty() {
            return Ok(0);
        }

        let mut incidents = self.incidents.lock().await;
        let before = incidents.len();

        incidents.retain(|id, incident| {
            id == keep_id
                || incident.status == IncidentStatus::Resolved
                || incident.category != category
                || incident.error_snippet != error_snippet
        });

        let removed = before - incidents.len();
        if removed > 0 {
            info!("Removed {removed} duplicate incident(s) of {keep_id}");
            self.persist(&incidents)?;
        }

        Ok(removed)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn persist(&self, incidents: &IndexMap<String, Incident>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let records: Vec<&Incident> = incidents.values().collect();
        let json = serde_json::to_string_pretty(&records)?;

        // Write-then-rename so a crash never leaves a truncated file behind.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;

        debug!("Saved {} incidents to {}", records.len(), path.display());
        Ok(())
    }
}
