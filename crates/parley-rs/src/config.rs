//! Layered configuration for the `parley` binary.
//!
//! Sources, lowest precedence first:
//!
//! 1. built-in defaults;
//! 2. an optional JSON file (`--config`);
//! 3. environment variables (`ANTHROPIC_API_KEY`, `LLM_PROVIDER_API_KEY`, `PARLEY_MODEL`);
//! 4. command-line flags.
//!
//! Every source produces a [`ConfigLayer`]; layers are merged and then
//! resolved into a validated [`AgentConfig`].
//!
//! A key supplied by the user (file, `ANTHROPIC_API_KEY`, or `--api-key`)
//! is billed to the user, so token charging is turned off. Only the
//! platform key (`LLM_PROVIDER_API_KEY`) enables it.

use crate::agent::config::SessionSettings;
use crate::api::retry::RetryConfig;
use crate::error::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const ENV_USER_API_KEY: &str = "ANTHROPIC_API_KEY";
pub const ENV_PLATFORM_API_KEY: &str = "LLM_PROVIDER_API_KEY";
pub const ENV_MODEL: &str = "PARLEY_MODEL";

/// Retired model names and their replacements.
pub const DEPRECATED_MODELS: &[(&str, &str)] = &[
    ("claude-sonnet-4-0", "claude-sonnet-4-5-20250929"),
    ("claude-3-7-sonnet-latest", "claude-sonnet-4-5-20250929"),
    ("claude-3-5-haiku-latest", "claude-haiku-4-5-20251001"),
];

/// Replacement for a retired model name, if any.
pub fn replacement_model(model: &str) -> Option<&'static str> {
    DEPRECATED_MODELS
        .iter()
        .find(|(old, _)| *old == model)
        .map(|(_, new)| *new)
}

/// One configuration source. `None` means "not set here".
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfigLayer {
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub max_output_tokens: Option<u32>,
    #[serde(alias = "maxNumberOfToolCallsPerQuery")]
    pub max_tool_calls_per_query: Option<u32>,
    pub tool_call_timeout_secs: Option<u64>,
    pub max_context_tokens: Option<u64>,
    pub safety_margin: Option<f64>,
    pub max_retries: Option<u32>,
    pub base_url: Option<String>,
    pub tools_file: Option<PathBuf>,
    /// A key the user brings. Disables token charging.
    #[serde(alias = "anthropicApiKey")]
    pub api_key: Option<String>,
    /// The platform's key. Only read from the environment.
    #[serde(skip)]
    pub platform_api_key: Option<String>,
}

impl ConfigLayer {
    /// Read a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let layer = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        debug!("Loaded config file {}", path.display());
        Ok(layer)
    }

    /// Read the process environment.
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Read variables through `lookup`. Empty values count as unset.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            model: get(ENV_MODEL),
            api_key: get(ENV_USER_API_KEY),
            platform_api_key: get(ENV_PLATFORM_API_KEY),
            ..Default::default()
        }
    }

    /// Overlay `higher` on top of `self`. Fields set in `higher` win.
    pub fn merge(self, higher: ConfigLayer) -> Self {
        Self {
            model: higher.model.or(self.model),
            system_prompt: higher.system_prompt.or(self.system_prompt),
            max_output_tokens: higher.max_output_tokens.or(self.max_output_tokens),
            max_tool_calls_per_query: higher
                .max_tool_calls_per_query
                .or(self.max_tool_calls_per_query),
            tool_call_timeout_secs: higher.tool_call_timeout_secs.or(self.tool_call_timeout_secs),
            max_context_tokens: higher.max_context_tokens.or(self.max_context_tokens),
            safety_margin: higher.safety_margin.or(self.safety_margin),
            max_retries: higher.max_retries.or(self.max_retries),
            base_url: higher.base_url.or(self.base_url),
            tools_file: higher.tools_file.or(self.tools_file),
            api_key: higher.api_key.or(self.api_key),
            platform_api_key: higher.platform_api_key.or(self.platform_api_key),
        }
    }
}

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub tools_file: Option<PathBuf>,
    pub settings: SessionSettings,
}

impl AgentConfig {
    /// Merge defaults, the optional file, the environment, and `cli`, then resolve.
    pub fn load(config_file: Option<&Path>, cli: ConfigLayer) -> Result<Self, ConfigError> {
        let file = match config_file {
            Some(path) => ConfigLayer::from_file(path)?,
            None => ConfigLayer::default(),
        };
        Self::resolve(file.merge(ConfigLayer::from_env()).merge(cli))
    }

    /// Validate a merged layer and fill in defaults.
    pub fn resolve(layer: ConfigLayer) -> Result<Self, ConfigError> {
        let defaults = SessionSettings::default();

        let mut model = layer.model.unwrap_or(defaults.model);
        if model.trim().is_empty() {
            return Err(ConfigError::Missing("model"));
        }
        if let Some(new) = replacement_model(&model) {
            warn!("Model '{model}' is deprecated, using '{new}' instead");
            model = new.to_string();
        }

        let (api_key, charge_for_tokens) = match (layer.api_key, layer.platform_api_key) {
            (Some(user), _) => (user, false),
            (None, Some(platform)) => (platform, true),
            (None, None) => return Err(ConfigError::Missing("API key")),
        };

        let settings = SessionSettings {
            system_prompt: layer.system_prompt.unwrap_or(defaults.system_prompt),
            model,
            max_output_tokens: positive(
                "maxOutputTokens",
                layer.max_output_tokens.unwrap_or(defaults.max_output_tokens),
            )?,
            max_tool_calls_per_query: positive(
                "maxToolCallsPerQuery",
                layer
                    .max_tool_calls_per_query
                    .unwrap_or(defaults.max_tool_calls_per_query),
            )?,
            tool_call_timeout_secs: positive(
                "toolCallTimeoutSecs",
                layer
                    .tool_call_timeout_secs
                    .unwrap_or(defaults.tool_call_timeout_secs),
            )?,
            max_context_tokens: positive(
                "maxContextTokens",
                layer.max_context_tokens.unwrap_or(defaults.max_context_tokens),
            )?,
            safety_margin: margin(layer.safety_margin.unwrap_or(defaults.safety_margin))?,
            charge_for_tokens,
            retry: match layer.max_retries {
                Some(n) => RetryConfig::with_retries(positive("maxRetries", n)?),
                None => defaults.retry,
            },
        };

        Ok(Self {
            api_key,
            base_url: layer.base_url,
            tools_file: layer.tools_file,
            settings,
        })
    }
}

fn positive<T: PartialOrd + Default + std::fmt::Display>(
    field: &'static str,
    value: T,
) -> Result<T, ConfigError> {
    if value > T::default() {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("must be positive, got {value}"),
        })
    }
}

fn margin(value: f64) -> Result<f64, ConfigError> {
    if value > 0.0 && value <= 1.0 {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            field: "safetyMargin",
            reason: format!("must be in (0, 1], got {value}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn with_key() -> ConfigLayer {
        ConfigLayer {
            api_key: Some("sk-user".into()),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_resolve() {
        let config = AgentConfig::resolve(with_key()).unwrap();
        assert_eq!(config.settings.model, crate::DEFAULT_MODEL);
        assert_eq!(config.settings.max_tool_calls_per_query, 10);
        assert!(!config.settings.charge_for_tokens);
    }

    #[test]
    fn user_key_disables_charging() {
        let env = HashMap::from([
            (ENV_USER_API_KEY, "sk-user"),
            (ENV_PLATFORM_API_KEY, "sk-platform"),
        ]);
        let layer = ConfigLayer::from_vars(|k| env.get(k).map(|v| v.to_string()));
        let config = AgentConfig::resolve(layer).unwrap();
        assert_eq!(config.api_key, "sk-user");
        assert!(!config.settings.charge_for_tokens);
    }

    #[test]
    fn platform_key_enables_charging() {
        let env = HashMap::from([(ENV_PLATFORM_API_KEY, "sk-platform"), (ENV_USER_API_KEY, " ")]);
        let layer = ConfigLayer::from_vars(|k| env.get(k).map(|v| v.to_string()));
        let config = AgentConfig::resolve(layer).unwrap();
        assert_eq!(config.api_key, "sk-platform");
        assert!(config.settings.charge_for_tokens);
    }

    #[test]
    fn missing_key_is_an_error() {
        let err = AgentConfig::resolve(ConfigLayer::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("API key")));
    }

    #[test]
    fn deprecated_models_are_replaced() {
        let layer = ConfigLayer {
            model: Some("claude-3-5-haiku-latest".into()),
            ..with_key()
        };
        let config = AgentConfig::resolve(layer).unwrap();
        assert_eq!(config.settings.model, "claude-haiku-4-5-20251001");
        assert_eq!(
            replacement_model("claude-sonnet-4-0"),
            Some("claude-sonnet-4-5-20250929")
        );
        assert_eq!(replacement_model("claude-opus-4-1"), None);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let layer = ConfigLayer {
            model: Some(" ".into()),
            ..with_key()
        };
        assert!(matches!(
            AgentConfig::resolve(layer),
            Err(ConfigError::Missing("model"))
        ));

        let layer = ConfigLayer {
            safety_margin: Some(1.5),
            ..with_key()
        };
        assert!(matches!(
            AgentConfig::resolve(layer),
            Err(ConfigError::Invalid { field: "safetyMargin", .. })
        ));

        let layer = ConfigLayer {
            max_output_tokens: Some(0),
            ..with_key()
        };
        assert!(matches!(
            AgentConfig::resolve(layer),
            Err(ConfigError::Invalid { field: "maxOutputTokens", .. })
        ));
    }

    #[test]
    fn later_layers_win() {
        let file = ConfigLayer {
            model: Some("file-model".into()),
            max_output_tokens: Some(100),
            ..Default::default()
        };
        let cli = ConfigLayer {
            model: Some("cli-model".into()),
            ..Default::default()
        };
        let merged = file.merge(cli);
        assert_eq!(merged.model.as_deref(), Some("cli-model"));
        assert_eq!(merged.max_output_tokens, Some(100));
    }

    #[test]
    fn reads_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"model": "claude-opus-4-1", "maxNumberOfToolCallsPerQuery": 4, "apiKey": "sk-file"}}"#
        )
        .unwrap();
        let layer = ConfigLayer::from_file(file.path()).unwrap();
        assert_eq!(layer.max_tool_calls_per_query, Some(4));
        let config = AgentConfig::resolve(layer).unwrap();
        assert_eq!(config.settings.model, "claude-opus-4-1");
        assert_eq!(config.api_key, "sk-file");
    }

    #[test]
    fn bad_file_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = ConfigLayer::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));

        let err = ConfigLayer::from_file(Path::new("/definitely/missing.json")).unwrap_err();
        assert!(err.to_string().contains("/definitely/missing.json"));
    }
}
