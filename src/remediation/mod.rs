//! Incident automation: diagnosis, patch generation, merge request
//! publication and the self-heal retry loop.

mod lifecycle;
mod publish;
mod self_heal;
mod snapshot;

use std::sync::Arc;

use crate::ai::Gateway;
use crate::config::AutomationConfig;
use crate::providers::Repository;
use crate::store::IncidentStore;

pub use lifecycle::AutomationOutcome;
pub use self_heal::SelfHealOutcome;

/// Runs automation for incidents of one project.
pub struct Remediator {
    store: Arc<IncidentStore>,
    repository: Arc<dyn Repository>,
    gateway: Gateway,
    settings: AutomationConfig,
    project: String,
    default_ref: String,
}

impl Remediator {
    /// # Arguments
    ///
    /// * `project` - Project recorded on incidents whose event names none
    /// * `default_ref` - Ref used when an incident carries none (e.g., "main")
    pub fn new(
        store: Arc<IncidentStore>,
        repository: Arc<dyn Repository>,
        gateway: Gateway,
        settings: AutomationConfig,
        project: impl Into<String>,
        default_ref: impl Into<String>,
    ) -> Self {
        Self {
            store,
            repository,
            gateway,
            settings,
            project: project.into(),
            default_ref: default_ref.into(),
        }
    }

    pub fn store(&self) -> &IncidentStore {
        &self.store
    }

    fn base_ref<'a>(&'a self, git_ref: Option<&'a str>) -> &'a str {
        git_ref
            .filter(|r| !r.trim().is_empty())
            .unwrap_or(&self.default_ref)
    }
}
