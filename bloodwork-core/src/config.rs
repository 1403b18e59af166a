//! Configuration system for bloodwork.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from `~/.config/bloodwork/config.toml` and/or `.bloodwork/config.toml`
//! in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::types::{MAX_LINKS_PER_ISSUE, MAX_RECOMMENDATIONS, MAX_URLS};

/// Top-level configuration for one pipeline invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

impl PipelineConfig {
    /// Collect warnings from every section.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.llm.validate();
        warnings.extend(self.email.validate());
        warnings.extend(self.report.validate());
        warnings
    }
}

/// Text-generation provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name: "gemini" or "openai" (any OpenAI-compatible endpoint).
    pub provider: String,
    /// Model identifier (e.g., "gemini-1.5-flash", "gpt-4o-mini").
    pub model: String,
    /// Inline API key. Takes precedence over `api_key_env`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override for the API endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
    /// Temperature for generation.
    pub temperature: f32,
    /// Whole-request timeout in seconds.
    pub timeout_secs: u64,
    /// Backoff policy for transient provider errors within a single call.
    pub retry: RetryConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: "gemini-1.5-flash".to_string(),
            api_key: None,
            api_key_env: "GEMINI_API_KEY".to_string(),
            base_url: None,
            max_tokens: 2048,
            temperature: 0.4,
            timeout_secs: 120,
            retry: RetryConfig::default(),
        }
    }
}

impl LlmConfig {
    /// Validate this LLM config and return any warnings.
    ///
    /// Returns an empty Vec if the config is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !matches!(self.provider.as_str(), "gemini" | "openai") {
            warnings.push(format!(
                "llm.provider '{}' is not one of gemini, openai",
                self.provider
            ));
        }
        if self.temperature < 0.0 || self.temperature > 2.0 {
            warnings.push(format!(
                "temperature ({}) is outside the typical range 0.0–2.0",
                self.temperature
            ));
        }
        if self.timeout_secs == 0 {
            warnings.push("llm.timeout_secs is 0; requests would never complete".to_string());
        }
        warnings
    }

    /// Resolve the API key: inline value first, then the named environment variable.
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.is_empty()) {
            return Ok(key.clone());
        }
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ConfigError::EnvVarMissing {
                var: self.api_key_env.clone(),
            })
    }
}

/// Exponential backoff for transient errors inside one generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Web search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Search endpoint; the query is appended as `?q=`.
    pub base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    /// Query template; `{issue}` is replaced by the issue label.
    pub query_template: String,
    /// Upper bound on candidates probed per issue.
    pub max_candidates_per_issue: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.google.com/search".to_string(),
            user_agent: "Mozilla/5.0".to_string(),
            timeout_secs: 10,
            query_template: "Health checkups related to {issue}".to_string(),
            max_candidates_per_issue: 10,
        }
    }
}

impl SearchConfig {
    pub fn query_for(&self, issue: &str) -> String {
        self.query_template.replace("{issue}", issue)
    }
}

/// Page fetch configuration, shared by reachability probes and content scraping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    pub probe_timeout_secs: u64,
    pub content_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub max_redirects: usize,
    /// Cap on aggregated article text sent to generation per issue.
    pub max_content_chars: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0".to_string(),
            probe_timeout_secs: 5,
            content_timeout_secs: 15,
            connect_timeout_secs: 5,
            max_redirects: 5,
            max_content_chars: 30_000,
        }
    }
}

/// SMTP delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub enabled: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    /// SMTP login; defaults to `from_address` when empty.
    pub username: String,
    /// Inline password. Takes precedence over `password_env`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub password_env: String,
    pub from_address: String,
    pub subject: String,
    pub timeout_secs: u64,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            smtp_host: "smtp.gmail.com".to_string(),
            smtp_port: 587,
            username: String::new(),
            password: None,
            password_env: "BLOODWORK_SMTP_PASSWORD".to_string(),
            from_address: String::new(),
            subject: "Personalized Health Recommendations".to_string(),
            timeout_secs: 30,
        }
    }
}

impl EmailConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.enabled && self.from_address.is_empty() {
            warnings.push(
                "email.enabled is true but email.from_address is empty; delivery will be skipped"
                    .to_string(),
            );
        }
        if self.smtp_port == 0 {
            warnings.push("email.smtp_port is 0".to_string());
        }
        warnings
    }

    pub fn login(&self) -> &str {
        if self.username.is_empty() {
            &self.from_address
        } else {
            &self.username
        }
    }

    /// Resolve the SMTP password: inline value first, then the named environment variable.
    pub fn resolve_password(&self) -> Result<String, ConfigError> {
        if let Some(pw) = self.password.as_ref().filter(|p| !p.is_empty()) {
            return Ok(pw.clone());
        }
        std::env::var(&self.password_env)
            .ok()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ConfigError::EnvVarMissing {
                var: self.password_env.clone(),
            })
    }
}

/// Bounds applied when assembling the final report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Clamped to 6.
    pub max_recommendations: usize,
    /// Clamped to 4.
    pub max_urls: usize,
    /// Clamped to 2.
    pub links_per_issue: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            max_recommendations: MAX_RECOMMENDATIONS,
            max_urls: MAX_URLS,
            links_per_issue: MAX_LINKS_PER_ISSUE,
        }
    }
}

impl ReportConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.max_recommendations > MAX_RECOMMENDATIONS {
            warnings.push(format!(
                "report.max_recommendations ({}) exceeds the hard limit of {}; clamping",
                self.max_recommendations, MAX_RECOMMENDATIONS
            ));
        }
        if self.max_urls > MAX_URLS {
            warnings.push(format!(
                "report.max_urls ({}) exceeds the hard limit of {}; clamping",
                self.max_urls, MAX_URLS
            ));
        }
        if self.links_per_issue > MAX_LINKS_PER_ISSUE {
            warnings.push(format!(
                "report.links_per_issue ({}) exceeds the hard limit of {}; clamping",
                self.links_per_issue, MAX_LINKS_PER_ISSUE
            ));
        }
        if self.links_per_issue == 0 {
            warnings.push("report.links_per_issue is 0; no article will be read".to_string());
        }
        warnings
    }
}

/// Path of the user-level config file, if a home directory can be determined.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "bloodwork", "bloodwork")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Path of the workspace-level config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".bloodwork").join("config.toml")
}

/// Load configuration with layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `BLOODWORK_`)
/// 3. Workspace-local config (`.bloodwork/config.toml`)
/// 4. User config (`~/.config/bloodwork/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&PipelineConfig>,
) -> Result<PipelineConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(PipelineConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // BLOODWORK_LLM__MODEL, BLOODWORK_EMAIL__FROM_ADDRESS, ...
    figment = figment.merge(Env::prefixed("BLOODWORK_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Write a default configuration to `<workspace>/.bloodwork/config.toml`.
///
/// Refuses to overwrite an existing file.
pub fn write_default_config(workspace: &Path) -> Result<PathBuf, ConfigError> {
    let path = workspace_config_path(workspace);
    if path.exists() {
        return Err(ConfigError::Invalid {
            message: format!("{} already exists", path.display()),
        });
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let toml_str =
        toml::to_string_pretty(&PipelineConfig::default()).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;
    std::fs::write(&path, toml_str).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.llm.provider, "gemini");
        assert_eq!(config.llm.model, "gemini-1.5-flash");
        assert_eq!(config.search.user_agent, "Mozilla/5.0");
        assert_eq!(config.fetch.probe_timeout_secs, 5);
        assert_eq!(config.email.smtp_host, "smtp.gmail.com");
        assert_eq!(config.email.smtp_port, 587);
        assert_eq!(config.report.max_recommendations, 6);
        assert_eq!(config.report.max_urls, 4);
        assert_eq!(config.report.links_per_issue, 2);
    }

    #[test]
    fn test_query_template() {
        let config = SearchConfig::default();
        assert_eq!(
            config.query_for("Anemia"),
            "Health checkups related to Anemia"
        );
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = PipelineConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: PipelineConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(deserialized.llm.model, config.llm.model);
        assert_eq!(deserialized.email.subject, config.email.subject);
    }

    #[test]
    fn test_load_config_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.search.query_template, "Health checkups related to {issue}");
    }

    #[test]
    fn test_load_config_from_workspace_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let config_dir = dir.path().join(".bloodwork");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("config.toml"),
            r#"
[llm]
provider = "openai"
model = "gpt-4o-mini"
api_key_env = "OPENAI_API_KEY"

[email]
from_address = "reports@example.com"
"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.llm.provider, "openai");
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.email.from_address, "reports@example.com");
        // Unset fields keep their defaults.
        assert_eq!(config.email.smtp_port, 587);
        assert_eq!(config.fetch.max_redirects, 5);
    }

    #[test]
    fn test_load_config_overrides_win() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut overrides = PipelineConfig::default();
        overrides.email.enabled = false;
        overrides.llm.model = "gemini-1.5-pro".into();
        let config = load_config(Some(dir.path()), Some(&overrides)).unwrap();
        assert!(!config.email.enabled);
        assert_eq!(config.llm.model, "gemini-1.5-pro");
    }

    #[test]
    fn test_write_default_config_refuses_overwrite() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_default_config(dir.path()).unwrap();
        assert!(path.exists());
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("[llm]"));
        assert!(write_default_config(dir.path()).is_err());
    }

    #[test]
    fn test_write_default_config_reports_io_failure() {
        let dir = tempfile::TempDir::new().unwrap();
        // A plain file where the `.bloodwork` directory should go.
        std::fs::write(dir.path().join(".bloodwork"), "").unwrap();
        let err = write_default_config(dir.path()).unwrap_err();
        assert!(
            matches!(&err, ConfigError::Io { path, .. } if path.ends_with(".bloodwork")),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn test_llm_config_validate_defaults_clean() {
        let warnings = LlmConfig::default().validate();
        assert!(warnings.is_empty(), "unexpected warnings: {:?}", warnings);
    }

    #[test]
    fn test_llm_config_validate_bad_values() {
        let config = LlmConfig {
            provider: "cohere".into(),
            temperature: 3.0,
            ..Default::default()
        };
        let warnings = config.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("cohere"));
        assert!(warnings[1].contains("temperature"));
    }

    #[test]
    fn test_resolve_api_key_prefers_inline() {
        let config = LlmConfig {
            api_key: Some("inline-key".into()),
            api_key_env: "BLOODWORK_TEST_UNSET_KEY_VAR".into(),
            ..Default::default()
        };
        assert_eq!(config.resolve_api_key().unwrap(), "inline-key");
    }

    #[test]
    fn test_resolve_api_key_missing_env() {
        let config = LlmConfig {
            api_key: None,
            api_key_env: "BLOODWORK_TEST_DEFINITELY_UNSET_VAR".into(),
            ..Default::default()
        };
        let err = config.resolve_api_key().unwrap_err();
        assert!(matches!(err, ConfigError::EnvVarMissing { .. }));
    }

    #[test]
    fn test_email_login_falls_back_to_sender() {
        let config = EmailConfig {
            from_address: "reports@example.com".into(),
            ..Default::default()
        };
        assert_eq!(config.login(), "reports@example.com");
    }

    #[test]
    fn test_email_validate_missing_sender() {
        let warnings = EmailConfig::default().validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("from_address"));
    }

    #[test]
    fn test_report_config_validate_clamps() {
        let config = ReportConfig {
            max_recommendations: 10,
            max_urls: 8,
            links_per_issue: 2,
        };
        assert_eq!(config.validate().len(), 2);
    }

    #[test]
    fn test_report_config_validate_links_per_issue() {
        let config = ReportConfig {
            links_per_issue: 5,
            ..Default::default()
        };
        let warnings = config.validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("links_per_issue (5)"));
    }
}
