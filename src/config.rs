use crate::error::{Error, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_INPUT_PATH: &str = "input.csv";
const DEFAULT_INSTRUCTION_PATH: &str = "system_prompt.txt";
const DEFAULT_OUTPUT_DIR: &str = "articles";
const DEFAULT_WORKERS: usize = 2;
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const MAX_TEMPERATURE: f32 = 2.0;

/// What the writer does when two prompts sanitize to the same file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollisionPolicy {
    /// The later document replaces the earlier one.
    #[default]
    Overwrite,
    /// Later documents get a ` (2)`, ` (3)`, ... suffix.
    Suffix,
}

/// API credential that never shows up in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wraps a raw key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the raw key for the authorization header.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns true if no key was supplied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("ApiKey(<empty>)")
        } else {
            f.write_str("ApiKey(<redacted>)")
        }
    }
}

/// Contents of the settings file.
///
/// ```toml
/// [openai]
/// api_key = "sk-..."
/// model = "gpt-4o-mini"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Remote completion service section
    pub openai: ServiceSettings,
}

/// The `[openai]` section of the settings file.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceSettings {
    /// Static API credential
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model identifier sent with every request
    #[serde(default)]
    pub model: Option<String>,

    /// Base URL of an OpenAI-compatible API
    #[serde(default)]
    pub base_url: Option<String>,

    /// Per-request timeout; unset means wait indefinitely
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Sampling temperature
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl fmt::Debug for ServiceSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl Settings {
    /// Reads and parses a settings file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the file does not exist and
    /// [`Error::Config`] if it is not valid TOML or misses required keys.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_toml_str(&content).map_err(|e| match e {
            Error::Config { message } => {
                Error::config(format!("{}: {message}", path.display()))
            }
            other => other,
        })
    }

    /// Parses settings from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the content is malformed.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(e.message().to_string()))
    }
}

/// Configuration for one batch run.
///
/// Use [`Config::builder()`] to construct a new configuration.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Config {
    /// Tabular file holding one prompt per row
    pub input_path: PathBuf,

    /// Text file holding the shared system instruction
    pub instruction_path: PathBuf,

    /// Directory receiving the generated documents
    pub output_dir: PathBuf,

    /// Maximum number of requests in flight
    pub workers: usize,

    /// Model identifier
    pub model: String,

    /// API credential
    pub api_key: ApiKey,

    /// Base URL of the completion API
    pub base_url: String,

    /// Per-request timeout
    pub timeout: Option<Duration>,

    /// Sampling temperature, service default when unset
    pub temperature: Option<f32>,

    /// File name collision handling
    pub collision_policy: CollisionPolicy,

    /// Dry run mode (no requests, no file writes)
    pub dry_run: bool,

    /// Write `summary.json` next to the documents
    pub write_summary: bool,
}

impl Config {
    /// Creates a new configuration builder.
    ///
    /// # Examples
    ///
    /// ```
    /// use prompt_docs::Config;
    ///
    /// let config = Config::builder()
    ///     .model("gpt-4o-mini")
    ///     .api_key("sk-test")
    ///     .workers(4)
    ///     .build()
    ///     .expect("valid configuration");
    /// ```
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Worker count is zero
    /// - Model or API key is missing outside of dry run mode
    /// - Base URL is not an http(s) URL
    /// - Temperature is out of range
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::config("workers must be greater than 0"));
        }

        if !self.dry_run {
            if self.model.trim().is_empty() {
                return Err(Error::config(
                    "model is required. Set it in the [openai] section or pass --model",
                ));
            }

            if self.api_key.is_empty() {
                return Err(Error::config(
                    "api_key is required. Set it in the [openai] section or OPENAI_API_KEY",
                ));
            }
        }

        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(Error::config(format!(
                "base_url must start with http:// or https://, got '{}'",
                self.base_url
            )));
        }

        if let Some(t) = self.temperature {
            if !(0.0..=MAX_TEMPERATURE).contains(&t) {
                return Err(Error::config(format!(
                    "temperature ({t}) must be between 0 and {MAX_TEMPERATURE}"
                )));
            }
        }

        Ok(())
    }

    /// Endpoint receiving chat completion requests.
    #[must_use]
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from(DEFAULT_INPUT_PATH),
            instruction_path: PathBuf::from(DEFAULT_INSTRUCTION_PATH),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            workers: DEFAULT_WORKERS,
            model: String::new(),
            api_key: ApiKey::default(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: None,
            temperature: None,
            collision_policy: CollisionPolicy::Overwrite,
            dry_run: false,
            write_summary: false,
        }
    }
}

/// Builder for creating a [`Config`].
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    input_path: Option<PathBuf>,
    instruction_path: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    workers: Option<usize>,
    model: Option<String>,
    api_key: Option<ApiKey>,
    base_url: Option<String>,
    timeout: Option<Duration>,
    temperature: Option<f32>,
    collision_policy: Option<CollisionPolicy>,
    dry_run: bool,
    write_summary: bool,
}

impl ConfigBuilder {
    /// Applies the values of a settings file.
    ///
    /// Values set explicitly on the builder afterwards take precedence.
    #[must_use]
    pub fn settings(mut self, settings: Settings) -> Self {
        let service = settings.openai;
        if let Some(model) = service.model {
            self.model = Some(model);
        }
        if let Some(key) = service.api_key {
            self.api_key = Some(ApiKey::new(key));
        }
        if let Some(url) = service.base_url {
            self.base_url = Some(url);
        }
        if let Some(secs) = service.timeout_secs {
            self.timeout = Some(Duration::from_secs(secs));
        }
        if let Some(t) = service.temperature {
            self.temperature = Some(t);
        }
        self
    }

    /// Sets the tabular input file.
    #[must_use]
    pub fn input_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.input_path = Some(path.into());
        self
    }

    /// Sets the system instruction file.
    #[must_use]
    pub fn instruction_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.instruction_path = Some(path.into());
        self
    }

    /// Sets the output directory for generated documents.
    #[must_use]
    pub fn output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(path.into());
        self
    }

    /// Sets the number of concurrent requests.
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Sets the model identifier.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the API credential.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(ApiKey::new(key));
        self
    }

    /// Sets the base URL of an OpenAI-compatible API.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the file name collision policy.
    #[must_use]
    pub fn collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.collision_policy = Some(policy);
        self
    }

    /// Enables dry run mode (no requests, no file writes).
    #[must_use]
    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    /// Enables writing `summary.json` into the output directory.
    #[must_use]
    pub fn write_summary(mut self, enabled: bool) -> Self {
        self.write_summary = enabled;
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn build(self) -> Result<Config> {
        let config = Config {
            input_path: self
                .input_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_INPUT_PATH)),
            instruction_path: self
                .instruction_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_INSTRUCTION_PATH)),
            output_dir: self
                .output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            workers: self.workers.unwrap_or(DEFAULT_WORKERS),
            model: self.model.unwrap_or_default(),
            api_key: self.api_key.unwrap_or_default(),
            base_url: self
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            timeout: self.timeout,
            temperature: self.temperature,
            collision_policy: self.collision_policy.unwrap_or_default(),
            dry_run: self.dry_run,
            write_summary: self.write_summary,
        };

        config.validate()?;
        Ok(config)
    }
}
