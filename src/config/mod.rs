//! Configuration system (layered: code > env > config file > defaults).

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::AgentError;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "AGENT_THREAD_CONFIG";

pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const DEFAULT_TASK_MODEL: &str = "claude-sonnet-4-5";

pub const MISSING_API_KEY: &str = "请先在设置中填写 Claude 的 apiKey。";

/// Which completion surface to talk to.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ApiFlavor {
    #[default]
    Messages,
    Responses,
}

/// A configured helper agent that turns can delegate prompts to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubagentConfig {
    pub id: String,
    pub name: String,
    pub system_prompt: Option<String>,
    pub task_model: Option<String>,
    pub reasoning_model: Option<String>,
}

impl SubagentConfig {
    /// Whether a delegation request addresses this agent, by id or by
    /// case-insensitive name.
    pub fn matches(&self, id: Option<&str>, name: Option<&str>) -> bool {
        let id = id.map(str::trim).filter(|s| !s.is_empty());
        let name = name.map(str::trim).filter(|s| !s.is_empty());
        id.is_some_and(|id| id == self.id || id.eq_ignore_ascii_case(&self.name))
            || name.is_some_and(|name| name.eq_ignore_ascii_case(&self.name) || name == self.id)
    }
}

/// Settings for the agent client.
///
/// Resolution order, highest first:
/// 1. Values set in code
/// 2. Environment variables (`.env` is loaded when present)
/// 3. The TOML file at `$AGENT_THREAD_CONFIG`, or `settings.toml` in the
///    platform config directory
/// 4. Defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub task_model: String,
    /// Model used for turns that ask for deep thinking.
    pub reasoning_model: Option<String>,
    pub max_tokens: u32,
    pub api_flavor: ApiFlavor,
    pub enable_thoughts: bool,
    /// Extra instructions appended to the default system prompt.
    pub master_system_prompt: Option<String>,
    pub max_retries: u32,
    pub request_timeout_secs: u64,
    pub subagents: Vec<SubagentConfig>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            task_model: DEFAULT_TASK_MODEL.to_string(),
            reasoning_model: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            api_flavor: ApiFlavor::default(),
            enable_thoughts: false,
            master_system_prompt: None,
            max_retries: 2,
            request_timeout_secs: 120,
            subagents: Vec::new(),
        }
    }
}

fn reasoning_trigger_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)深度思考|思考模式|think").expect("valid regex"))
}

impl AgentSettings {
    /// Load settings from the config file and the environment.
    ///
    /// A missing file is not an error; a malformed one is.
    pub fn load() -> Result<Self, AgentError> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error

        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .or_else(default_config_path);

        let settings = match path {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };

        Ok(settings.with_env(|key| std::env::var(key).ok()))
    }

    /// Parse a TOML settings file.
    pub fn from_file(path: &Path) -> Result<Self, AgentError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
            .map_err(|e| AgentError::Configuration(format!("{}: {e}", path.display())))
    }

    pub fn from_toml(text: &str) -> Result<Self, AgentError> {
        toml::from_str(text).map_err(|e| AgentError::Configuration(e.to_string()))
    }

    /// Overlay environment variables read through `lookup`.
    ///
    /// Empty values are ignored, as are unparseable numbers and flavors.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("ANTHROPIC_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(url) = get("ANTHROPIC_BASE_URL") {
            self.base_url = Some(url);
        }
        if let Some(model) = get("AGENT_THREAD_MODEL") {
            self.task_model = model;
        }
        if let Some(model) = get("AGENT_THREAD_REASONING_MODEL") {
            self.reasoning_model = Some(model);
        }
        if let Some(max_tokens) = get("AGENT_THREAD_MAX_TOKENS") {
            self.max_tokens = resolve_max_tokens(&max_tokens);
        }
        if let Some(flavor) = get("AGENT_THREAD_API_FLAVOR").and_then(|f| f.trim().parse().ok()) {
            self.api_flavor = flavor;
        }
        self
    }

    /// The API key, or a configuration error telling the user to set one.
    pub fn require_api_key(&self) -> Result<&str, AgentError> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AgentError::Configuration(MISSING_API_KEY.into()))
    }

    /// Output token cap, falling back to the default for a zero value.
    pub fn effective_max_tokens(&self) -> u32 {
        if self.max_tokens == 0 {
            DEFAULT_MAX_TOKENS
        } else {
            self.max_tokens
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Whether `input` asks for deep thinking and thinking is enabled.
    pub fn wants_reasoning(&self, input: &str) -> bool {
        self.enable_thoughts && reasoning_trigger_re().is_match(input)
    }

    /// Model for a turn with the given input, preferring the subagent's own
    /// models when one runs the turn.
    pub fn select_model<'a>(&'a self, input: &str, subagent: Option<&'a SubagentConfig>) -> &'a str {
        self.model_for(subagent, self.wants_reasoning(input))
    }

    pub fn model_for<'a>(&'a self, subagent: Option<&'a SubagentConfig>, reasoning: bool) -> &'a str {
        let non_empty = |m: &'a Option<String>| m.as_deref().filter(|m| !m.is_empty());
        if reasoning {
            subagent
                .and_then(|s| non_empty(&s.reasoning_model))
                .or_else(|| non_empty(&self.reasoning_model))
                .unwrap_or(&self.task_model)
        } else {
            subagent
                .and_then(|s| non_empty(&s.task_model))
                .unwrap_or(&self.task_model)
        }
    }

    /// The configured subagent a delegation request addresses.
    pub fn resolve_subagent(&self, id: Option<&str>, name: Option<&str>) -> Option<&SubagentConfig> {
        self.subagents.iter().find(|s| s.matches(id, name))
    }
}

/// `settings.toml` in the platform config directory.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "agent-thread")
        .map(|dirs| dirs.config_dir().join("settings.toml"))
}

/// Parse a max-token value, falling back to the default when it is not a
/// positive number. Fractions are floored.
pub fn resolve_max_tokens(raw: &str) -> u32 {
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 1.0 => v.floor().min(u32::MAX as f64) as u32,
        _ => DEFAULT_MAX_TOKENS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let settings = AgentSettings::default();
        assert_eq!(settings.max_tokens, 1024);
        assert_eq!(settings.max_retries, 2);
        assert_eq!(settings.api_flavor, ApiFlavor::Messages);
    }

    #[test]
    fn reads_toml_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            r#"
api_key = "file-key"
task_model = "claude-file"
api_flavor = "responses"
enable_thoughts = true
"#,
        )
        .unwrap();

        let settings = AgentSettings::from_file(&path).unwrap();
        assert_eq!(settings.api_key.as_deref(), Some("file-key"));
        assert_eq!(settings.task_model, "claude-file");
        assert_eq!(settings.api_flavor, ApiFlavor::Responses);
        assert!(settings.enable_thoughts);
        assert_eq!(settings.max_tokens, 1024);
    }

    #[test]
    fn malformed_toml_is_a_configuration_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "max_tokens = \"lots\"").unwrap();
        assert!(matches!(
            AgentSettings::from_file(&path),
            Err(AgentError::Configuration(_))
        ));
    }

    #[test]
    fn env_overrides_file_values() {
        let settings = AgentSettings::from_toml("task_model = \"from-file\"")
            .unwrap()
            .with_env(env(&[
                ("ANTHROPIC_API_KEY", "env-key"),
                ("AGENT_THREAD_MODEL", "from-env"),
                ("AGENT_THREAD_MAX_TOKENS", "2048.7"),
                ("AGENT_THREAD_API_FLAVOR", "Responses"),
                ("ANTHROPIC_BASE_URL", ""),
            ]));
        assert_eq!(settings.api_key.as_deref(), Some("env-key"));
        assert_eq!(settings.task_model, "from-env");
        assert_eq!(settings.max_tokens, 2048);
        assert_eq!(settings.api_flavor, ApiFlavor::Responses);
        assert_eq!(settings.base_url, None);
    }

    #[test]
    fn invalid_max_tokens_fall_back() {
        assert_eq!(resolve_max_tokens("0"), 1024);
        assert_eq!(resolve_max_tokens("-5"), 1024);
        assert_eq!(resolve_max_tokens("many"), 1024);
        assert_eq!(resolve_max_tokens("300"), 300);
    }

    #[test]
    fn missing_api_key_is_reported() {
        let err = AgentSettings::default().require_api_key().unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: 请先在设置中填写 Claude 的 apiKey。");
    }

    #[test]
    fn reasoning_model_selected_only_when_enabled_and_triggered() {
        let mut settings = AgentSettings {
            task_model: "task".into(),
            reasoning_model: Some("reason".into()),
            ..Default::default()
        };
        assert_eq!(settings.select_model("please THINK hard", None), "task");

        settings.enable_thoughts = true;
        assert_eq!(settings.select_model("please THINK hard", None), "reason");
        assert_eq!(settings.select_model("开启深度思考", None), "reason");
        assert_eq!(settings.select_model("click the button", None), "task");

        settings.reasoning_model = None;
        assert_eq!(settings.select_model("think", None), "task");
    }

    #[test]
    fn subagent_models_take_precedence() {
        let settings = AgentSettings {
            task_model: "task".into(),
            reasoning_model: Some("reason".into()),
            ..Default::default()
        };
        let helper = SubagentConfig {
            id: "writer".into(),
            name: "Writer".into(),
            task_model: Some("writer-task".into()),
            ..Default::default()
        };
        assert_eq!(settings.model_for(Some(&helper), false), "writer-task");
        assert_eq!(settings.model_for(Some(&helper), true), "reason");
    }

    #[test]
    fn subagents_resolve_by_id_or_name() {
        let settings = AgentSettings::from_toml(
            r#"
[[subagents]]
id = "research"
name = "Researcher"
system_prompt = "Cite sources."
"#,
        )
        .unwrap();
        assert!(settings.resolve_subagent(Some("research"), None).is_some());
        assert!(settings.resolve_subagent(None, Some(" researcher ")).is_some());
        assert!(settings.resolve_subagent(Some("Researcher"), None).is_some());
        assert!(settings.resolve_subagent(Some("writer"), Some("")).is_none());
    }
}
