use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use parley_llm::{DEFAULT_IMAGE_MODEL, DEFAULT_OPENAI_MODEL, ProviderConfig};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu, ensure};

use crate::chat::{DEFAULT_TURN_TIMEOUT, RouterOptions};

pub const DEFAULT_PROVIDER_ID: &str = "openai";
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
pub const SETTINGS_DIRECTORY_NAME: &str = "parley";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
/// Prefix for environment overrides, e.g. `PARLEY_CHAT_MODEL`.
pub const ENV_PREFIX: &str = "PARLEY_";
/// Read when no `api_key` is configured.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// What startup does when no API credential can be found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnMissingCredential {
    #[default]
    Halt,
    WarnAndContinue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_provider_id")]
    pub provider_id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub on_missing_credential: OnMissingCredential,
    #[serde(default = "default_support_image_upload")]
    pub support_image_upload: bool,
    #[serde(default = "default_turn_timeout_secs")]
    pub turn_timeout_secs: u64,
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            provider_id: default_provider_id(),
            api_key: String::new(),
            endpoint: default_endpoint(),
            chat_model: default_chat_model(),
            image_model: default_image_model(),
            system_prompt: None,
            on_missing_credential: OnMissingCredential::default(),
            support_image_upload: default_support_image_upload(),
            turn_timeout_secs: default_turn_timeout_secs(),
            artifact_dir: default_artifact_dir(),
        }
    }
}

impl AppSettings {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".parley"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    /// Layers built-in defaults, the JSON file at `config_path` and `PARLEY_*`
    /// environment variables, in that order. The file must exist.
    pub fn load(config_path: &Path) -> Result<Self, ConfigurationError> {
        ensure!(
            config_path.is_file(),
            SettingsFileNotFoundSnafu {
                stage: "locate-settings-file",
                path: config_path.to_path_buf(),
            }
        );
        Self::extract(config_path, true)
    }

    /// Same layering as [`AppSettings::load`], but a missing file means defaults.
    pub fn load_or_defaults(config_path: &Path) -> Result<Self, ConfigurationError> {
        let present = config_path.is_file();
        if !present {
            tracing::info!("settings file not found at {:?}, using defaults", config_path);
        }
        Self::extract(config_path, present)
    }

    fn extract(config_path: &Path, with_file: bool) -> Result<Self, ConfigurationError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if with_file {
            figment = figment.merge(Json::file(config_path));
        }

        figment
            .merge(Env::prefixed(ENV_PREFIX))
            .extract::<Self>()
            .context(ExtractSettingsSnafu {
                stage: "extract-settings",
                path: config_path.to_path_buf(),
            })
            .map(Self::normalized)
    }

    pub fn normalized(mut self) -> Self {
        self.provider_id = if self.provider_id.trim().is_empty() {
            default_provider_id()
        } else {
            self.provider_id.trim().to_string()
        };
        self.api_key = self.api_key.trim().to_string();
        self.endpoint = if self.endpoint.trim().is_empty() {
            default_endpoint()
        } else {
            self.endpoint.trim().to_string()
        };
        if self.chat_model.trim().is_empty() {
            self.chat_model = default_chat_model();
        }
        if self.image_model.trim().is_empty() {
            self.image_model = default_image_model();
        }
        self.system_prompt = self
            .system_prompt
            .map(|prompt| prompt.trim().to_string())
            .filter(|prompt| !prompt.is_empty());
        if self.turn_timeout_secs == 0 {
            self.turn_timeout_secs = default_turn_timeout_secs();
        }

        self
    }

    /// Configured `api_key`, else the `OPENAI_API_KEY` value from `lookup`.
    pub fn resolve_credential(&self, lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
        if !self.api_key.is_empty() {
            return Some(self.api_key.clone());
        }

        lookup(API_KEY_ENV)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    /// Applies the missing-credential policy.
    ///
    /// Returns `Ok(None)` when the credential is absent but the policy allows
    /// serving anyway.
    pub fn require_credential(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Option<String>, ConfigurationError> {
        if let Some(api_key) = self.resolve_credential(lookup) {
            return Ok(Some(api_key));
        }

        match self.on_missing_credential {
            OnMissingCredential::Halt => MissingCredentialSnafu {
                stage: "require-credential",
                provider_id: self.provider_id.clone(),
                env_var: API_KEY_ENV,
            }
            .fail(),
            OnMissingCredential::WarnAndContinue => {
                tracing::warn!(
                    provider_id = %self.provider_id,
                    env_var = API_KEY_ENV,
                    "no API credential found; every generation request will fail"
                );
                Ok(None)
            }
        }
    }

    pub fn to_provider_config(&self, api_key: &str) -> ProviderConfig {
        ProviderConfig::new(&self.provider_id, api_key, &self.endpoint)
            .with_artifact_dir(&self.artifact_dir)
    }

    pub fn router_options(&self) -> RouterOptions {
        RouterOptions {
            image_model: self.image_model.clone(),
            system_prompt: self.system_prompt.clone(),
            turn_timeout: Duration::from_secs(self.turn_timeout_secs),
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigurationError {
    #[snafu(display(
        "{env_var} not found and no api_key configured for provider '{provider_id}'; \
         check your .env file"
    ))]
    MissingCredential {
        stage: &'static str,
        provider_id: String,
        env_var: &'static str,
    },
    #[snafu(display("settings file {path:?} does not exist"))]
    SettingsFileNotFound { stage: &'static str, path: PathBuf },
    #[snafu(display("failed to load settings from {path:?} on `{stage}`: {source}"))]
    ExtractSettings {
        stage: &'static str,
        path: PathBuf,
        #[snafu(source(from(figment::Error, Box::new)))]
        source: Box<figment::Error>,
    },
}

fn default_provider_id() -> String {
    DEFAULT_PROVIDER_ID.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_chat_model() -> String {
    DEFAULT_OPENAI_MODEL.to_string()
}

fn default_image_model() -> String {
    DEFAULT_IMAGE_MODEL.to_string()
}

fn default_support_image_upload() -> bool {
    true
}

fn default_turn_timeout_secs() -> u64 {
    DEFAULT_TURN_TIMEOUT.as_secs()
}

fn default_artifact_dir() -> PathBuf {
    dirs::data_dir()
        .map(|path| path.join(SETTINGS_DIRECTORY_NAME).join("images"))
        .unwrap_or_else(|| std::env::temp_dir().join("parley-images"))
}
