//! Configuration management for sandcode.
//!
//! Configuration is loaded from multiple sources and merged:
//! 1. Global config: `~/.config/sandcode/config.json`
//! 2. Environment variable: `SANDCODE_CONFIG_CONTENT`
//! 3. Project config: `sandcode.jsonc` or `sandcode.json` in the project root
//!
//! Supports JSONC (JSON with comments) and variable substitution:
//! - `{env:VAR_NAME}` - Substitute environment variable
//! - `{file:path}` - Substitute file contents

use crate::error::{ConfigError, CoreResult};
use sandcode_tools::context::{SearchSettings, TypeCheckSettings, DEFAULT_SHARED_MODULE_PREFIX};
use sandcode_tools::{PermissionRule, ToolMode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

/// Environment variable holding inline config content.
pub const CONFIG_CONTENT_ENV: &str = "SANDCODE_CONFIG_CONTENT";

const PROJECT_CONFIG_FILES: &[&str] = &["sandcode.jsonc", "sandcode.json"];
const DEFAULT_TYPE_CHECK_TIMEOUT_SECS: u64 = 120;

static VAR_REGEX: OnceLock<Option<regex::Regex>> = OnceLock::new();

/// Variable substitution regex, compiled once on first use.
fn var_regex() -> Option<&'static regex::Regex> {
    VAR_REGEX
        .get_or_init(|| regex::Regex::new(r"\{(env|file):([^}]+)\}").ok())
        .as_ref()
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// JSON Schema reference.
    #[serde(rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Log level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LogLevel>,

    /// Hide every state-modifying tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,

    /// Tool enable/disable by name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<HashMap<String, bool>>,

    /// Ordered permission rules. Later rules win ties.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission: Option<Vec<PermissionRule>>,

    /// Collaborator API settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collaborator: Option<CollaboratorConfig>,

    /// Managed database connection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseConfig>,

    /// Line-search settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<SearchConfig>,

    /// Type checker settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_check: Option<TypeCheckConfig>,

    /// Root-relative prefixes of modules shared with other projects.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_modules: Option<Vec<String>>,
}

/// Log levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for sandcode_util::log::LogLevel {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::Trace,
            LogLevel::Debug => Self::Debug,
            LogLevel::Info => Self::Info,
            LogLevel::Warn => Self::Warn,
            LogLevel::Error => Self::Error,
        }
    }
}

/// Collaborator API configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Bearer credential. Usually `{env:SANDCODE_COLLABORATOR_TOKEN}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl CollaboratorConfig {
    pub fn merge(mut self, other: Self) -> Self {
        if other.base_url.is_some() {
            self.base_url = other.base_url;
        }
        if other.token.is_some() {
            self.token = other.token;
        }
        if other.timeout_secs.is_some() {
            self.timeout_secs = other.timeout_secs;
        }
        self
    }
}

/// Database configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Search configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ripgrep_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
}

impl SearchConfig {
    pub fn merge(mut self, other: Self) -> Self {
        if other.ripgrep_path.is_some() {
            self.ripgrep_path = other.ripgrep_path;
        }
        if other.max_results.is_some() {
            self.max_results = other.max_results;
        }
        self
    }
}

/// Type checker configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeCheckConfig {
    /// Program followed by its arguments, e.g. `["npx", "tsc", "--noEmit"]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl TypeCheckConfig {
    pub fn merge(mut self, other: Self) -> Self {
        if other.command.is_some() {
            self.command = other.command;
        }
        if other.timeout_secs.is_some() {
            self.timeout_secs = other.timeout_secs;
        }
        self
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Loading order (later sources override earlier):
    /// 1. Global config from `~/.config/sandcode/`
    /// 2. `SANDCODE_CONFIG_CONTENT` environment variable
    /// 3. Project config from the project root
    pub async fn load(project_dir: Option<&Path>) -> CoreResult<(Self, Vec<PathBuf>)> {
        let mut config = Config::default();
        let mut sources = Vec::new();

        // 1. Load global config
        if let Some(global_dir) = Self::global_config_dir() {
            for name in &["config.json", "config.jsonc"] {
                let path = global_dir.join(name);
                if path.exists() {
                    let loaded = Self::load_file(&path).await?;
                    config = config.merge(loaded);
                    sources.push(path);
                    break;
                }
            }
        }

        // 2. Load from environment variable
        if let Ok(content) = std::env::var(CONFIG_CONTENT_ENV) {
            let base = project_dir.unwrap_or(Path::new("."));
            let content = Self::substitute_variables(&content, base)?;
            let loaded = Self::parse_jsonc(&content, "<env>")?;
            config = config.merge(loaded);
        }

        // 3. Load project config
        if let Some(dir) = project_dir {
            for name in PROJECT_CONFIG_FILES {
                let path = dir.join(name);
                if path.exists() {
                    let loaded = Self::load_file(&path).await?;
                    config = config.merge(loaded);
                    sources.push(path);
                    break;
                }
            }
        }

        config.validate()?;
        Ok((config, sources))
    }

    /// Get the global config directory.
    ///
    /// On Unix systems, prefers `~/.config/sandcode` over the
    /// platform-specific directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        #[cfg(unix)]
        {
            if let Some(home) = dirs::home_dir() {
                let xdg_config = home.join(".config").join("sandcode");
                if xdg_config.exists() {
                    return Some(xdg_config);
                }
            }
        }

        sandcode_util::path::config_dir()
    }

    /// Load configuration from a file.
    pub async fn load_file(path: &Path) -> CoreResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let base = path.parent().unwrap_or(Path::new("."));
        let content = Self::substitute_variables(&content, base)?;
        Self::parse_jsonc(&content, &path.display().to_string())
    }

    /// Parse JSONC (JSON with comments).
    pub fn parse_jsonc(content: &str, source: &str) -> CoreResult<Self> {
        let stripped = Self::strip_comments(content);

        serde_json::from_str(&stripped).map_err(|e| {
            ConfigError::InvalidJson {
                path: source.to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Strip `//` and `/* */` comments outside of strings.
    fn strip_comments(input: &str) -> String {
        let mut result = String::with_capacity(input.len());
        let mut chars = input.chars().peekable();
        let mut in_string = false;
        let mut escape_next = false;

        while let Some(c) = chars.next() {
            if escape_next {
                result.push(c);
                escape_next = false;
                continue;
            }

            if in_string {
                match c {
                    '\\' => escape_next = true,
                    '"' => in_string = false,
                    _ => {}
                }
                result.push(c);
                continue;
            }

            match (c, chars.peek()) {
                ('"', _) => {
                    in_string = true;
                    result.push(c);
                }
                ('/', Some('/')) => {
                    chars.next();
                    for c in chars.by_ref() {
                        if c == '\n' {
                            result.push('\n');
                            break;
                        }
                    }
                }
                ('/', Some('*')) => {
                    chars.next();
                    let mut prev = ' ';
                    for c in chars.by_ref() {
                        if prev == '*' && c == '/' {
                            break;
                        }
                        // Keep line numbers stable for error messages.
                        if c == '\n' {
                            result.push('\n');
                        }
                        prev = c;
                    }
                }
                _ => result.push(c),
            }
        }

        result
    }

    /// Substitute `{env:VAR}` and `{file:path}` references.
    ///
    /// File paths are relative to `base_dir`. Every reference must resolve.
    fn substitute_variables(content: &str, base_dir: &Path) -> CoreResult<String> {
        let Some(re) = var_regex() else {
            return Ok(content.to_string());
        };

        let mut result = content.to_string();
        for cap in re.captures_iter(content) {
            let (Some(full), Some(kind), Some(value)) = (cap.get(0), cap.get(1), cap.get(2)) else {
                continue;
            };
            let value = value.as_str();

            let replacement = match kind.as_str() {
                "env" => std::env::var(value).map_err(|_| ConfigError::EnvVarNotFound {
                    name: value.to_string(),
                })?,
                "file" => {
                    let file_path = base_dir.join(value);
                    std::fs::read_to_string(&file_path)
                        .map(|v| v.trim().to_string())
                        .map_err(|_| ConfigError::FileRefNotFound {
                            path: file_path.display().to_string(),
                        })?
                }
                _ => continue,
            };

            // Substituted text lands inside JSON strings.
            let escaped = serde_json::to_string(&replacement)?;
            let escaped = &escaped[1..escaped.len() - 1];
            result = result.replace(full.as_str(), escaped);
        }

        Ok(result)
    }

    /// Check values that deserialize fine but cannot work.
    pub fn validate(&self) -> CoreResult<()> {
        if let Some(url) = self.collaborator.as_ref().and_then(|c| c.base_url.as_deref()) {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Validation {
                    message: format!("collaborator.base_url must be an http(s) URL, got '{url}'"),
                }
                .into());
            }
        }
        if self.search.as_ref().and_then(|s| s.max_results) == Some(0) {
            return Err(ConfigError::Validation {
                message: "search.max_results must be greater than zero".to_string(),
            }
            .into());
        }
        if self
            .type_check
            .as_ref()
            .and_then(|t| t.command.as_ref())
            .is_some_and(|c| c.is_empty())
        {
            return Err(ConfigError::Validation {
                message: "type_check.command must name a program".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(mut self, other: Self) -> Self {
        if other.schema.is_some() {
            self.schema = other.schema;
        }
        if other.log_level.is_some() {
            self.log_level = other.log_level;
        }
        if other.read_only.is_some() {
            self.read_only = other.read_only;
        }
        if other.shared_modules.is_some() {
            self.shared_modules = other.shared_modules;
        }

        self.collaborator = match (self.collaborator, other.collaborator) {
            (Some(base), Some(other)) => Some(base.merge(other)),
            (base, None) => base,
            (None, other) => other,
        };
        self.search = match (self.search, other.search) {
            (Some(base), Some(other)) => Some(base.merge(other)),
            (base, None) => base,
            (None, other) => other,
        };
        self.type_check = match (self.type_check, other.type_check) {
            (Some(base), Some(other)) => Some(base.merge(other)),
            (base, None) => base,
            (None, other) => other,
        };
        self.database = merge_option(self.database, other.database);

        self.tools = merge_hashmap(self.tools, other.tools);
        self.permission = match (self.permission, other.permission) {
            (Some(mut base), Some(other)) => {
                base.extend(other);
                Some(base)
            }
            (base, None) => base,
            (None, other) => other,
        };

        self
    }

    pub fn tool_mode(&self) -> ToolMode {
        if self.read_only.unwrap_or(false) {
            ToolMode::ReadOnly
        } else {
            ToolMode::ReadWrite
        }
    }

    pub fn permission_rules(&self) -> Vec<PermissionRule> {
        self.permission.clone().unwrap_or_default()
    }

    pub fn search_settings(&self) -> SearchSettings {
        let mut settings = SearchSettings::default();
        if let Some(search) = &self.search {
            if let Some(path) = &search.ripgrep_path {
                settings.ripgrep_path = path.clone();
            }
            if let Some(max) = search.max_results {
                settings.max_results = max;
            }
        }
        settings
    }

    /// Type checker settings, if a command is configured.
    pub fn type_check_settings(&self) -> Option<TypeCheckSettings> {
        let type_check = self.type_check.as_ref()?;
        let command = type_check.command.clone().filter(|c| !c.is_empty())?;
        Some(TypeCheckSettings {
            command,
            timeout: Duration::from_secs(
                type_check
                    .timeout_secs
                    .unwrap_or(DEFAULT_TYPE_CHECK_TIMEOUT_SECS),
            ),
        })
    }

    pub fn shared_module_prefixes(&self) -> Vec<String> {
        self.shared_modules
            .clone()
            .unwrap_or_else(|| vec![DEFAULT_SHARED_MODULE_PREFIX.to_string()])
    }

    pub fn database_id(&self) -> Option<&str> {
        self.database.as_ref().and_then(|d| d.id.as_deref())
    }
}

/// Merge two Option values.
fn merge_option<T>(base: Option<T>, other: Option<T>) -> Option<T> {
    match (base, other) {
        (_, Some(o)) => Some(o),
        (b, None) => b,
    }
}

/// Merge two HashMaps.
fn merge_hashmap<K: std::hash::Hash + Eq, V>(
    base: Option<HashMap<K, V>>,
    other: Option<HashMap<K, V>>,
) -> Option<HashMap<K, V>> {
    match (base, other) {
        (Some(mut b), Some(o)) => {
            b.extend(o);
            Some(b)
        }
        (b, None) => b,
        (None, o) => o,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandcode_tools::Decision;

    #[test]
    fn test_strip_comments() {
        let input = r#"{
            // Line comment
            "key": "value", // trailing comment
            /* block comment */
            "key2": "val/*not a comment*/ue",
            "key3": "escaped \" // still a string"
        }"#;

        let result = Config::strip_comments(input);
        assert!(!result.contains("Line comment"));
        assert!(!result.contains("trailing comment"));
        assert!(!result.contains("block comment"));
        assert!(result.contains("val/*not a comment*/ue"));
        assert!(result.contains(r#""escaped \" // still a string""#));
    }

    #[test]
    fn test_parse_jsonc() {
        let input = r#"{
            // This is a comment
            "log_level": "debug",
            "read_only": true,
            "permission": [
                {"tool": "execute_sql", "decision": "deny"},
                {"tool": "write_file", "path": "src/*", "decision": "allow"}
            ],
            "type_check": {"command": ["npx", "tsc", "--noEmit"]}
        }"#;

        let config = Config::parse_jsonc(input, "test").unwrap();
        assert_eq!(config.log_level, Some(LogLevel::Debug));
        assert_eq!(config.tool_mode(), ToolMode::ReadOnly);
        let rules = config.permission_rules();
        assert_eq!(rules[0].decision, Decision::Deny);
        assert_eq!(rules[1].path.as_deref(), Some("src/*"));
        let type_check = config.type_check_settings().unwrap();
        assert_eq!(type_check.command, vec!["npx", "tsc", "--noEmit"]);
        assert_eq!(type_check.timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_invalid_json_names_source() {
        let err = Config::parse_jsonc("{ nope", "sandcode.json").unwrap_err();
        assert!(err.to_string().contains("sandcode.json"));
    }

    #[test]
    fn test_merge_config() {
        let base = Config::parse_jsonc(
            r#"{
                "log_level": "info",
                "tools": {"grep": false, "read_file": true},
                "permission": [{"tool": "*", "decision": "ask"}],
                "search": {"ripgrep_path": "/usr/bin/rg", "max_results": 50}
            }"#,
            "base",
        )
        .unwrap();
        let other = Config::parse_jsonc(
            r#"{
                "log_level": "warn",
                "tools": {"grep": true},
                "permission": [{"tool": "read_file", "decision": "allow"}],
                "search": {"max_results": 10}
            }"#,
            "other",
        )
        .unwrap();

        let merged = base.merge(other);
        assert_eq!(merged.log_level, Some(LogLevel::Warn));
        let tools = merged.tools.as_ref().unwrap();
        assert_eq!(tools.get("grep"), Some(&true));
        assert_eq!(tools.get("read_file"), Some(&true));
        assert_eq!(merged.permission_rules().len(), 2);
        assert_eq!(merged.permission_rules()[1].tool, "read_file");
        let search = merged.search_settings();
        assert_eq!(search.ripgrep_path, PathBuf::from("/usr/bin/rg"));
        assert_eq!(search.max_results, 10);
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.tool_mode(), ToolMode::ReadWrite);
        assert_eq!(config.shared_module_prefixes(), vec!["shared/".to_string()]);
        assert!(config.type_check_settings().is_none());
        assert_eq!(config.search_settings().max_results, 200);
        assert!(config.database_id().is_none());
    }

    #[test]
    fn test_substitute_env_and_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("token.txt"), "  file-secret\n").unwrap();
        std::env::set_var("SANDCODE_TEST_DB_ID", "db_\"quoted\"");

        let content = r#"{"database": {"id": "{env:SANDCODE_TEST_DB_ID}"}, "collaborator": {"token": "{file:token.txt}"}}"#;
        let substituted = Config::substitute_variables(content, dir.path()).unwrap();
        let config = Config::parse_jsonc(&substituted, "test").unwrap();
        assert_eq!(config.database_id(), Some("db_\"quoted\""));
        assert_eq!(
            config.collaborator.unwrap().token.as_deref(),
            Some("file-secret")
        );
    }

    #[test]
    fn test_missing_substitution_fails() {
        let err = Config::substitute_variables(
            r#"{"x": "{env:SANDCODE_TEST_SURELY_UNSET_VAR}"}"#,
            Path::new("."),
        )
        .unwrap_err();
        assert!(err.to_string().contains("SANDCODE_TEST_SURELY_UNSET_VAR"));

        let err = Config::substitute_variables(r#"{"x": "{file:missing.txt}"}"#, Path::new("/nonexistent"))
            .unwrap_err();
        assert!(err.to_string().contains("missing.txt"));
    }

    #[test]
    fn test_validation() {
        let config = Config::parse_jsonc(r#"{"collaborator": {"base_url": "ftp://x"}}"#, "t").unwrap();
        assert!(config.validate().is_err());
        let config = Config::parse_jsonc(r#"{"search": {"max_results": 0}}"#, "t").unwrap();
        assert!(config.validate().is_err());
        let config = Config::parse_jsonc(r#"{"type_check": {"command": []}}"#, "t").unwrap();
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_project_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("sandcode.jsonc"),
            "{\n  // project settings\n  \"shared_modules\": [\"packages/shared/\"]\n}",
        )
        .unwrap();

        let (config, sources) = Config::load(Some(dir.path())).await.unwrap();
        assert_eq!(config.shared_module_prefixes(), vec!["packages/shared/".to_string()]);
        assert!(sources.contains(&dir.path().join("sandcode.jsonc")));
    }
}
