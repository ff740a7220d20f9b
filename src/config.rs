use crate::error::ConfigError;
use crate::llm::{Credential, DEFAULT_BASE_URL, DEFAULT_MODEL, GeminiSettings};
use clap::{Parser, Subcommand, ValueEnum};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Prefix for environment overrides, e.g. `CHATBOT_SERVER__PORT=9000`.
pub const ENV_PREFIX: &str = "CHATBOT";

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_NAME: &str = "chatbot";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE", global = true)]
    pub config: Option<String>,

    /// Address to bind
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT", global = true)]
    pub port: Option<u16>,

    /// Gemini model identifier
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Log output format
    #[arg(long, value_enum, global = true)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Serve the web chat UI (default)
    Serve,
    /// Chat in the terminal
    Repl {
        /// Wait for complete replies instead of streaming
        #[arg(long)]
        no_stream: bool,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    fn as_str(self) -> &'static str {
        match self {
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    pub timeout_disabled: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub connect_timeout_secs: u64,
    /// Longest gap between response bytes before a turn fails.
    pub read_timeout_secs: u64,
    #[serde(default)]
    pub system_instruction: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl AppConfig {
    /// Parse `args` as a command line and load the layered configuration.
    pub fn load_from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli = Cli::try_parse_from(args).map_err(|e| ConfigError::InvalidSetting {
            key: "cli".to_string(),
            reason: e.to_string(),
        })?;
        Self::load(&cli)
    }

    /// Build the configuration.
    ///
    /// Priority: CLI flag > `CHATBOT_*` env var > config file > defaults.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8501)?
            .set_default("server.request_timeout_secs", 120)?
            .set_default("server.timeout_disabled", false)?
            .set_default("llm.base_url", DEFAULT_BASE_URL)?
            .set_default("llm.model", DEFAULT_MODEL)?
            .set_default("llm.api_key_env", "GEMINI_API_KEY")?
            .set_default("llm.connect_timeout_secs", 10)?
            .set_default("llm.read_timeout_secs", 60)?
            .set_default("session.idle_timeout_secs", 60 * 60)?
            .set_default("session.sweep_interval_secs", 5 * 60)?
            .set_default("logging.format", LogFormat::default().as_str())?;

        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_NAME).required(false)),
        };

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(host) = &cli.host {
            builder = builder.set_override("server.host", host.as_str())?;
        }
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", i64::from(port))?;
        }
        if let Some(model) = &cli.model {
            builder = builder.set_override("llm.model", model.as_str())?;
        }
        if let Some(format) = cli.log_format {
            builder = builder.set_override("logging.format", format.as_str())?;
        }

        let cfg = builder.build()?;
        Ok(cfg.try_deserialize()?)
    }
}

/// Resolve provider settings, reading the credential from the process
/// environment.
pub fn load_gemini_settings(llm: &LlmConfig) -> Result<GeminiSettings, ConfigError> {
    gemini_settings_with(llm, |var| std::env::var(var).ok())
}

/// Resolve provider settings with an explicit variable lookup.
///
/// Fails with [`ConfigError::MissingCredential`] before anything touches the
/// network when the key is absent or blank.
pub fn gemini_settings_with<F>(llm: &LlmConfig, lookup: F) -> Result<GeminiSettings, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let api_key = lookup(&llm.api_key_env)
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ConfigError::MissingCredential {
            var: llm.api_key_env.clone(),
        })?;

    let base_url = url::Url::parse(&llm.base_url).map_err(|e| ConfigError::InvalidSetting {
        key: "llm.base_url".to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(base_url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidSetting {
            key: "llm.base_url".to_string(),
            reason: format!("unsupported scheme {}", base_url.scheme()),
        });
    }

    let model = llm.model.trim();
    if model.is_empty() {
        return Err(ConfigError::InvalidSetting {
            key: "llm.model".to_string(),
            reason: "cannot be empty".to_string(),
        });
    }

    if let Some(t) = llm.temperature
        && !(t.is_finite() && t >= 0.0)
    {
        return Err(ConfigError::InvalidSetting {
            key: "llm.temperature".to_string(),
            reason: format!("must be a non-negative number, got {t}"),
        });
    }

    let system_instruction = llm
        .system_instruction
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string);

    Ok(GeminiSettings {
        base_url,
        model: model.to_string(),
        credential: Credential::new(api_key),
        system_instruction,
        temperature: llm.temperature,
        max_output_tokens: llm.max_output_tokens,
        connect_timeout: Duration::from_secs(llm.connect_timeout_secs),
        read_timeout: Duration::from_secs(llm.read_timeout_secs.max(1)),
    })
}
