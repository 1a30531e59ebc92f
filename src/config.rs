use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration file structure for pipefix.
///
/// Holds the GitLab project context, the ordered list of model providers and
/// the automation limits. Configuration files are loaded from the current
/// directory or a specified path; secrets are referenced by environment
/// variable name rather than stored inline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// GitLab project the incidents belong to
    #[serde(default)]
    pub gitlab: GitLabConfig,

    /// Model providers, tried in order
    #[serde(default)]
    pub ai: AiConfig,

    /// Retry ceiling and context limits
    #[serde(default)]
    pub automation: AutomationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GitLabConfig {
    /// GitLab personal or project access token
    pub token: Option<String>,

    /// GitLab instance base URL
    #[serde(default = "default_gitlab_base_url")]
    pub base_url: String,

    /// GitLab project path (e.g., 'group/project') or numeric id
    pub project: Option<String>,

    /// Ref used when an incident does not carry one
    #[serde(default = "default_ref")]
    pub default_ref: String,

    /// Timeout for each GitLab API call
    #[serde(default = "default_gitlab_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AiConfig {
    /// Timeout for a single provider request
    #[serde(default = "default_ai_timeout_secs")]
    pub timeout_secs: u64,

    /// Fallback chain, first entry is the primary provider
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProviderConfig {
    /// Name recorded on analyses and patches (e.g., "deepseek")
    pub name: String,

    /// Wire protocol spoken by the provider
    #[serde(default)]
    pub kind: ProviderKind,

    /// API base URL
    pub base_url: String,

    /// Model identifier sent with each request
    pub model: String,

    /// Environment variable holding the API key
    pub api_key_env: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// OpenAI-compatible `/chat/completions`
    #[default]
    ChatCompletions,
    /// Google `generateContent`
    Gemini,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AutomationConfig {
    /// Self-heal attempts allowed per incident
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Candidate files embedded in a patch prompt
    #[serde(default = "default_max_context_files")]
    pub max_context_files: usize,

    /// Files larger than this are left out of the repository snapshot
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: usize,

    /// Upper bound on files collected for one snapshot
    #[serde(default = "default_max_snapshot_files")]
    pub max_snapshot_files: usize,

    /// Open the merge request as soon as a patch validates
    #[serde(default)]
    pub auto_publish: bool,

    /// Drop open incidents with the same category and error snippet once a fix lands
    #[serde(default = "default_true")]
    pub dedupe_on_success: bool,
}

impl Default for GitLabConfig {
    fn default() -> Self {
        Self {
            token: None,
            base_url: default_gitlab_base_url(),
            project: None,
            default_ref: default_ref(),
            timeout_secs: default_gitlab_timeout_secs(),
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_ai_timeout_secs(),
            providers: default_providers(),
        }
    }
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            max_context_files: default_max_context_files(),
            max_file_bytes: default_max_file_bytes(),
            max_snapshot_files: default_max_snapshot_files(),
            auto_publish: false,
            dedupe_on_success: true,
        }
    }
}

fn default_gitlab_base_url() -> String {
    "https://gitlab.com".to_string()
}

fn default_ref() -> String {
    "main".to_string()
}

fn default_gitlab_timeout_secs() -> u64 {
    30
}

fn default_ai_timeout_secs() -> u64 {
    40
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig {
            name: "deepseek".to_string(),
            kind: ProviderKind::ChatCompletions,
            base_url: "https://api.deepseek.com/v1".to_string(),
            model: "deepseek-chat".to_string(),
            api_key_env: "DEEPSEEK_API_KEY".to_string(),
        },
        ProviderConfig {
            name: "openrouter".to_string(),
            kind: ProviderKind::ChatCompletions,
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "meta-llama/llama-3.1-70b-instruct".to_string(),
            api_key_env: "OPENROUTER_API_KEY".to_string(),
        },
        ProviderConfig {
            name: "gemini".to_string(),
            kind: ProviderKind::Gemini,
            base_url: "https://generativelanguage.googleapis.com/v1".to_string(),
            model: "gemini-2.0-flash".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
        },
    ]
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_context_files() -> usize {
    12
}

fn default_max_file_bytes() -> usize {
    200_000
}

fn default_max_snapshot_files() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./pipefix.toml
    /// 3. ./pipefix.json
    /// 4. ./pipefix.yaml
    /// 5. ./pipefix.yml
    ///
    /// Returns default configuration if no file is found. `AI_RETRY_MAX`
    /// overrides the retry ceiling either way.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_path(path)?,
            None => {
                let candidates = ["pipefix.toml", "pipefix.json", "pipefix.yaml", "pipefix.yml"];

                match candidates.iter().map(Path::new).find(|p| p.exists()) {
                    Some(found) => Self::load_from_path(found)?,
                    None => Self::default(),
                }
            }
        };

        if let Ok(raw) = std::env::var("AI_RETRY_MAX") {
            config.automation.max_retries = raw
                .trim()
                .parse()
                .with_context(|| format!("AI_RETRY_MAX is not a number: {raw}"))?;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => {
                // Try TOML first, then JSON, then YAML
                toml::from_str(&contents)
                    .or_else(|_| serde_json::from_str(&contents))
                    .or_else(|_| serde_yaml::from_str(&contents))
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))
            }
        }
    }
}
