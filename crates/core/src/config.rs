use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::time::Timezone;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub discord: DiscordConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub natural: NaturalConfig,
    pub server: ServerConfig,
    pub calendar: CalendarConfig,
    pub flow: FlowConfig,
    pub timezone: Timezone,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DiscordConfig {
    pub bot_token: SecretString,
    pub application_id: Option<String>,
    pub guild_id: String,
    pub api_base_url: String,
    pub sync_commands: bool,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct NaturalConfig {
    pub enabled: bool,
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
    pub public_url: String,
    pub jwt_secret: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct CalendarConfig {
    pub refresh_interval_secs: u64,
    pub fetch_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct FlowConfig {
    pub confirmation_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub data_dir: Option<PathBuf>,
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub bot_token: Option<String>,
    pub application_id: Option<String>,
    pub guild_id: Option<String>,
    pub natural_enabled: Option<bool>,
    pub natural_api_key: Option<String>,
    pub server_enabled: Option<bool>,
    pub server_port: Option<u16>,
    pub jwt_secret: Option<String>,
    pub flow_timeout_secs: Option<u64>,
    pub timezone: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("`{path}` is not valid TOML: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("config file `{0}` does not exist")]
    MissingConfigFile(PathBuf),
    #[error("`${{{var}}}` refers to an unset environment variable")]
    MissingEnvInterpolation { var: String },
    #[error("`${{` without a closing `}}` in config file")]
    UnterminatedInterpolation,
    #[error("{key}=`{value}` could not be parsed")]
    InvalidEnvOverride { key: String, value: String },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            discord: DiscordConfig {
                bot_token: String::new().into(),
                application_id: None,
                guild_id: String::new(),
                api_base_url: "https://discord.com/api/v10".to_string(),
                sync_commands: false,
            },
            storage: StorageConfig { data_dir: PathBuf::from("./data") },
            database: DatabaseConfig { url: String::new(), max_connections: 5, timeout_secs: 30 },
            natural: NaturalConfig {
                enabled: false,
                api_key: None,
                base_url: "https://api.groq.com/openai/v1".to_string(),
                model: "llama3-8b-8192".to_string(),
                timeout_secs: 30,
            },
            server: ServerConfig {
                enabled: true,
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
                public_url: "http://localhost:8080".to_string(),
                jwt_secret: None,
            },
            calendar: CalendarConfig { refresh_interval_secs: 300, fetch_timeout_secs: 30 },
            flow: FlowConfig { confirmation_timeout_secs: 120 },
            timezone: Timezone::Local,
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("teamdesk.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides)?;
        config.derive_database_url();
        config.validate()?;

        Ok(config)
    }

    /// Database file lives under the data directory unless a URL was set explicitly.
    fn derive_database_url(&mut self) {
        if self.database.url.trim().is_empty() {
            let data_dir = self.storage.data_dir.display().to_string();
            let data_dir = data_dir.trim_end_matches('/');
            self.database.url = format!("sqlite://{data_dir}/teamdesk.db?mode=rwc");
        }
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(discord) = patch.discord {
            if let Some(bot_token_value) = discord.bot_token {
                self.discord.bot_token = secret_value(bot_token_value);
            }
            if let Some(application_id) = discord.application_id {
                self.discord.application_id = Some(application_id);
            }
            if let Some(guild_id) = discord.guild_id {
                self.discord.guild_id = guild_id;
            }
            if let Some(api_base_url) = discord.api_base_url {
                self.discord.api_base_url = api_base_url;
            }
            if let Some(sync_commands) = discord.sync_commands {
                self.discord.sync_commands = sync_commands;
            }
        }

        if let Some(storage) = patch.storage {
            if let Some(data_dir) = storage.data_dir {
                self.storage.data_dir = data_dir;
            }
        }

        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(natural) = patch.natural {
            if let Some(enabled) = natural.enabled {
                self.natural.enabled = enabled;
            }
            if let Some(api_key_value) = natural.api_key {
                self.natural.api_key = Some(secret_value(api_key_value));
            }
            if let Some(base_url) = natural.base_url {
                self.natural.base_url = base_url;
            }
            if let Some(model) = natural.model {
                self.natural.model = model;
            }
            if let Some(timeout_secs) = natural.timeout_secs {
                self.natural.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(enabled) = server.enabled {
                self.server.enabled = enabled;
            }
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
            if let Some(public_url) = server.public_url {
                self.server.public_url = public_url;
            }
            if let Some(jwt_secret_value) = server.jwt_secret {
                self.server.jwt_secret = Some(secret_value(jwt_secret_value));
            }
        }

        if let Some(calendar) = patch.calendar {
            if let Some(refresh_interval_secs) = calendar.refresh_interval_secs {
                self.calendar.refresh_interval_secs = refresh_interval_secs;
            }
            if let Some(fetch_timeout_secs) = calendar.fetch_timeout_secs {
                self.calendar.fetch_timeout_secs = fetch_timeout_secs;
            }
        }

        if let Some(flow) = patch.flow {
            if let Some(confirmation_timeout_secs) = flow.confirmation_timeout_secs {
                self.flow.confirmation_timeout_secs = confirmation_timeout_secs;
            }
        }

        if let Some(timezone) = patch.timezone {
            self.timezone = timezone.parse().map_err(|_| {
                ConfigError::Validation(format!(
                    "timezone `{timezone}` is not supported (expected local, UTC, +HH:MM or an IANA name)"
                ))
            })?;
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("TEAMDESK_DISCORD_BOT_TOKEN") {
            self.discord.bot_token = secret_value(value);
        }
        if let Some(value) = read_env("TEAMDESK_DISCORD_APPLICATION_ID") {
            self.discord.application_id = Some(value);
        }
        if let Some(value) = read_env("TEAMDESK_DISCORD_GUILD_ID") {
            self.discord.guild_id = value;
        }
        if let Some(value) = read_env("TEAMDESK_DISCORD_API_BASE_URL") {
            self.discord.api_base_url = value;
        }
        if let Some(value) = read_env("TEAMDESK_DISCORD_SYNC_COMMANDS") {
            self.discord.sync_commands = parse_env("TEAMDESK_DISCORD_SYNC_COMMANDS", &value)?;
        }

        if let Some(value) = read_env("TEAMDESK_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(value);
        }

        if let Some(value) = read_env("TEAMDESK_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("TEAMDESK_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_env("TEAMDESK_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("TEAMDESK_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("TEAMDESK_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("TEAMDESK_NATURAL_ENABLED") {
            self.natural.enabled = parse_env("TEAMDESK_NATURAL_ENABLED", &value)?;
        }
        if let Some(value) = read_env("TEAMDESK_NATURAL_API_KEY") {
            self.natural.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("TEAMDESK_NATURAL_BASE_URL") {
            self.natural.base_url = value;
        }
        if let Some(value) = read_env("TEAMDESK_NATURAL_MODEL") {
            self.natural.model = value;
        }
        if let Some(value) = read_env("TEAMDESK_NATURAL_TIMEOUT_SECS") {
            self.natural.timeout_secs = parse_env("TEAMDESK_NATURAL_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("TEAMDESK_SERVER_ENABLED") {
            self.server.enabled = parse_env("TEAMDESK_SERVER_ENABLED", &value)?;
        }
        if let Some(value) = read_env("TEAMDESK_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("TEAMDESK_SERVER_PORT") {
            self.server.port = parse_env("TEAMDESK_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("TEAMDESK_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_env("TEAMDESK_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }
        if let Some(value) = read_env("TEAMDESK_SERVER_PUBLIC_URL") {
            self.server.public_url = value;
        }
        let jwt_secret =
            read_env("TEAMDESK_JWT_SECRET").or_else(|| read_env("TEAMDESK_SERVER_JWT_SECRET"));
        if let Some(value) = jwt_secret {
            self.server.jwt_secret = Some(secret_value(value));
        }

        if let Some(value) = read_env("TEAMDESK_CALENDAR_REFRESH_SECS") {
            self.calendar.refresh_interval_secs =
                parse_env("TEAMDESK_CALENDAR_REFRESH_SECS", &value)?;
        }
        if let Some(value) = read_env("TEAMDESK_CALENDAR_FETCH_TIMEOUT_SECS") {
            self.calendar.fetch_timeout_secs =
                parse_env("TEAMDESK_CALENDAR_FETCH_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("TEAMDESK_FLOW_TIMEOUT_SECS") {
            self.flow.confirmation_timeout_secs = parse_env("TEAMDESK_FLOW_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("TEAMDESK_TIMEZONE") {
            self.timezone = value.parse().map_err(|_| ConfigError::InvalidEnvOverride {
                key: "TEAMDESK_TIMEZONE".to_string(),
                value: value.clone(),
            })?;
        }

        let log_level =
            read_env("TEAMDESK_LOGGING_LEVEL").or_else(|| read_env("TEAMDESK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("TEAMDESK_LOGGING_FORMAT").or_else(|| read_env("TEAMDESK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) -> Result<(), ConfigError> {
        if let Some(data_dir) = overrides.data_dir {
            self.storage.data_dir = data_dir;
        }
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(bot_token) = overrides.bot_token {
            self.discord.bot_token = secret_value(bot_token);
        }
        if let Some(application_id) = overrides.application_id {
            self.discord.application_id = Some(application_id);
        }
        if let Some(guild_id) = overrides.guild_id {
            self.discord.guild_id = guild_id;
        }
        if let Some(enabled) = overrides.natural_enabled {
            self.natural.enabled = enabled;
        }
        if let Some(api_key) = overrides.natural_api_key {
            self.natural.api_key = Some(secret_value(api_key));
        }
        if let Some(enabled) = overrides.server_enabled {
            self.server.enabled = enabled;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(jwt_secret) = overrides.jwt_secret {
            self.server.jwt_secret = Some(secret_value(jwt_secret));
        }
        if let Some(timeout_secs) = overrides.flow_timeout_secs {
            self.flow.confirmation_timeout_secs = timeout_secs;
        }
        if let Some(timezone) = overrides.timezone {
            self.timezone = timezone.parse().map_err(|_| {
                ConfigError::Validation(format!(
                    "timezone `{timezone}` is not supported (expected local, UTC, +HH:MM or an IANA name)"
                ))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_discord(&self.discord)?;
        validate_database(&self.database)?;
        validate_natural(&self.natural)?;
        validate_server(&self.server)?;
        validate_calendar(&self.calendar)?;
        validate_flow(&self.flow)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("teamdesk.toml"), PathBuf::from("config/teamdesk.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation(message.into())
}

fn within(key: &str, value: u64, range: std::ops::RangeInclusive<u64>) -> Result<(), ConfigError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(invalid(format!("{key} must be between {} and {} (got {value})", range.start(), range.end())))
    }
}

fn secret_missing(secret: Option<&SecretString>) -> bool {
    secret.map_or(true, |value| value.expose_secret().trim().is_empty())
}

fn validate_discord(discord: &DiscordConfig) -> Result<(), ConfigError> {
    let bot_token = discord.bot_token.expose_secret();
    if bot_token.trim().is_empty() {
        return Err(invalid(
            "discord.bot_token is required. Get it from https://discord.com/developers/applications > Your App > Bot",
        ));
    }
    if bot_token.chars().any(char::is_whitespace) {
        return Err(invalid(
            "discord.bot_token must not contain whitespace (paste the raw token without the `Bot ` prefix)",
        ));
    }

    match discord.guild_id.trim() {
        "" => return Err(invalid("discord.guild_id is required to scope slash commands")),
        id if !id.chars().all(|ch| ch.is_ascii_digit()) => {
            return Err(invalid(format!("discord.guild_id must be a numeric snowflake, got `{id}`")));
        }
        _ => {}
    }

    // Interaction callbacks and reply edits are addressed by application id.
    match discord.application_id.as_deref().map(str::trim) {
        None | Some("") => Err(invalid(
            "discord.application_id is required. Find it under https://discord.com/developers/applications > Your App > General Information",
        )),
        Some(id) if !id.chars().all(|ch| ch.is_ascii_digit()) => {
            Err(invalid(format!("discord.application_id must be a numeric snowflake, got `{id}`")))
        }
        Some(_) => Ok(()),
    }
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    if !(url.starts_with("sqlite:") || url == ":memory:") {
        return Err(invalid(format!("database.url `{url}` is not a sqlite URL")));
    }
    within("database.max_connections", u64::from(database.max_connections), 1..=64)?;
    within("database.timeout_secs", database.timeout_secs, 1..=300)
}

fn validate_natural(natural: &NaturalConfig) -> Result<(), ConfigError> {
    within("natural.timeout_secs", natural.timeout_secs, 1..=300)?;
    if !natural.enabled {
        return Ok(());
    }
    if secret_missing(natural.api_key.as_ref()) {
        return Err(invalid("natural.api_key is required when natural-language commands are enabled"));
    }
    if !is_http_url(&natural.base_url) {
        return Err(invalid(format!("natural.base_url `{}` is not an http(s) URL", natural.base_url)));
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    within("server.graceful_shutdown_secs", server.graceful_shutdown_secs, 1..=600)?;
    if !server.enabled {
        return Ok(());
    }
    if server.port == 0 {
        return Err(invalid("server.port must be non-zero"));
    }
    if !is_http_url(&server.public_url) {
        return Err(invalid(format!("server.public_url `{}` is not an http(s) URL", server.public_url)));
    }
    if secret_missing(server.jwt_secret.as_ref()) {
        return Err(invalid(
            "server.jwt_secret is required when the HTTP service is enabled (TEAMDESK_JWT_SECRET)",
        ));
    }
    Ok(())
}

fn validate_calendar(calendar: &CalendarConfig) -> Result<(), ConfigError> {
    within("calendar.refresh_interval_secs", calendar.refresh_interval_secs, 60..=86_400)?;
    within("calendar.fetch_timeout_secs", calendar.fetch_timeout_secs, 1..=300)
}

fn validate_flow(flow: &FlowConfig) -> Result<(), ConfigError> {
    within("flow.confirmation_timeout_secs", flow.confirmation_timeout_secs, 1..=900)
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    if matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
        return Ok(());
    }
    Err(invalid(format!(
        "logging.level `{}` is not one of trace|debug|info|warn|error",
        logging.level
    )))
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_owned(),
        value: value.to_owned(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    discord: Option<DiscordPatch>,
    storage: Option<StoragePatch>,
    database: Option<DatabasePatch>,
    natural: Option<NaturalPatch>,
    server: Option<ServerPatch>,
    calendar: Option<CalendarPatch>,
    flow: Option<FlowPatch>,
    timezone: Option<String>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DiscordPatch {
    bot_token: Option<String>,
    application_id: Option<String>,
    guild_id: Option<String>,
    api_base_url: Option<String>,
    sync_commands: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct StoragePatch {
    data_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct NaturalPatch {
    enabled: Option<bool>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    enabled: Option<bool>,
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
    public_url: Option<String>,
    jwt_secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CalendarPatch {
    refresh_interval_secs: Option<u64>,
    fetch_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct FlowPatch {
    confirmation_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
    use crate::time::Timezone;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    const REQUIRED_VARS: &[&str] =
        &[
            "TEAMDESK_DISCORD_BOT_TOKEN",
            "TEAMDESK_DISCORD_APPLICATION_ID",
            "TEAMDESK_DISCORD_GUILD_ID",
            "TEAMDESK_JWT_SECRET",
        ];

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn set_required_vars() {
        env::set_var("TEAMDESK_DISCORD_BOT_TOKEN", "bot-token-from-env");
        env::set_var("TEAMDESK_DISCORD_APPLICATION_ID", "987654321");
        env::set_var("TEAMDESK_DISCORD_GUILD_ID", "424242");
        env::set_var("TEAMDESK_JWT_SECRET", "jwt-from-env");
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_TEAMDESK_BOT_TOKEN", "interpolated-token");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("teamdesk.toml");
            fs::write(
                &path,
                r#"
timezone = "+07:00"

[discord]
bot_token = "${TEST_TEAMDESK_BOT_TOKEN}"
application_id = "5678"
guild_id = "1234"

[server]
jwt_secret = "file-secret"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.discord.bot_token.expose_secret() == "interpolated-token",
                "bot token should be interpolated from the environment",
            )?;
            ensure(config.discord.guild_id == "1234", "guild id should come from the file")?;
            ensure(
                matches!(config.timezone, Timezone::Fixed(offset) if offset.local_minus_utc() == 7 * 3600),
                "timezone offset should be parsed from the file",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_TEAMDESK_BOT_TOKEN"]);
        result
    }

    #[test]
    fn database_url_defaults_under_data_dir() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        set_required_vars();
        env::set_var("TEAMDESK_DATA_DIR", "/var/lib/teamdesk/");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            ensure(
                config.database.url == "sqlite:///var/lib/teamdesk/teamdesk.db?mode=rwc",
                "database url should be derived from the data dir",
            )?;
            ensure(
                config.flow.confirmation_timeout_secs == 120,
                "confirmation deadline should default to two minutes",
            )?;
            Ok(())
        })();

        clear_vars(REQUIRED_VARS);
        clear_vars(&["TEAMDESK_DATA_DIR"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        set_required_vars();
        env::set_var("TEAMDESK_LOG_LEVEL", "warn");
        env::set_var("TEAMDESK_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(REQUIRED_VARS);
        clear_vars(&["TEAMDESK_LOG_LEVEL", "TEAMDESK_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        set_required_vars();
        env::set_var("TEAMDESK_DATABASE_URL", "sqlite://from-env.db");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("teamdesk.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[discord]
bot_token = "token-from-file"
guild_id = "999"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.discord.bot_token.expose_secret() == "bot-token-from-env",
                "env bot token should win over file and defaults",
            )?;
            ensure(config.discord.guild_id == "424242", "env guild id should win over file")?;
            Ok(())
        })();

        clear_vars(REQUIRED_VARS);
        clear_vars(&["TEAMDESK_DATABASE_URL"]);
        result
    }

    #[test]
    fn missing_guild_fails_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        env::set_var("TEAMDESK_DISCORD_BOT_TOKEN", "token");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("discord.guild_id")
            );
            ensure(has_message, "validation failure should mention discord.guild_id")
        })();

        clear_vars(&["TEAMDESK_DISCORD_BOT_TOKEN"]);
        result
    }

    #[test]
    fn natural_handler_requires_api_key_only_when_enabled() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        set_required_vars();

        let result = (|| -> Result<(), String> {
            let disabled = AppConfig::load(LoadOptions::default());
            ensure(disabled.is_ok(), "disabled natural handler should not need a key")?;

            let enabled = AppConfig::load(LoadOptions {
                overrides: ConfigOverrides {
                    natural_enabled: Some(true),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            });
            ensure(
                matches!(enabled, Err(ConfigError::Validation(ref message)) if message.contains("natural.api_key")),
                "enabled natural handler without key should fail validation",
            )
        })();

        clear_vars(REQUIRED_VARS);
        result
    }

    #[test]
    fn jwt_secret_is_optional_when_server_disabled() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        env::set_var("TEAMDESK_DISCORD_BOT_TOKEN", "token");
        env::set_var("TEAMDESK_DISCORD_APPLICATION_ID", "2");
        env::set_var("TEAMDESK_DISCORD_GUILD_ID", "1");

        let result = (|| -> Result<(), String> {
            let enabled = AppConfig::load(LoadOptions::default());
            ensure(
                matches!(enabled, Err(ConfigError::Validation(ref message)) if message.contains("jwt_secret")),
                "enabled server without secret should fail",
            )?;

            let disabled = AppConfig::load(LoadOptions {
                overrides: ConfigOverrides {
                    server_enabled: Some(false),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            });
            ensure(disabled.is_ok(), "disabled server should not need a jwt secret")
        })();

        clear_vars(&[
            "TEAMDESK_DISCORD_BOT_TOKEN",
            "TEAMDESK_DISCORD_APPLICATION_ID",
            "TEAMDESK_DISCORD_GUILD_ID",
        ]);
        result
    }

    #[test]
    fn application_id_is_required_and_numeric() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        set_required_vars();
        env::remove_var("TEAMDESK_DISCORD_APPLICATION_ID");

        let result = (|| -> Result<(), String> {
            let missing = AppConfig::load(LoadOptions::default());
            ensure(
                matches!(missing, Err(ConfigError::Validation(ref message)) if message.contains("discord.application_id is required")),
                "missing application id should fail even with command sync disabled",
            )?;

            let malformed = AppConfig::load(LoadOptions {
                overrides: ConfigOverrides {
                    application_id: Some("my-bot".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            });
            ensure(
                matches!(malformed, Err(ConfigError::Validation(ref message)) if message.contains("numeric snowflake")),
                "non-numeric application id should fail",
            )?;

            let config = AppConfig::load(LoadOptions {
                overrides: ConfigOverrides {
                    application_id: Some("1122334455".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;
            ensure(
                config.discord.application_id.as_deref() == Some("1122334455"),
                "override application id should be kept",
            )
        })();

        clear_vars(REQUIRED_VARS);
        result
    }

    #[test]
    fn named_timezones_load_from_env() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        set_required_vars();
        env::set_var("TEAMDESK_TIMEZONE", "Asia/Ho_Chi_Minh");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            ensure(
                config.timezone == Timezone::Named(chrono_tz::Asia::Ho_Chi_Minh),
                "IANA timezone names should be accepted",
            )
        })();

        clear_vars(REQUIRED_VARS);
        clear_vars(&["TEAMDESK_TIMEZONE"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        set_required_vars();
        env::set_var("TEAMDESK_NATURAL_API_KEY", "gsk-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("bot-token-from-env"),
                "debug output should not contain bot token",
            )?;
            ensure(!debug.contains("jwt-from-env"), "debug output should not contain jwt secret")?;
            ensure(
                !debug.contains("gsk-secret-value"),
                "debug output should not contain natural api key",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(REQUIRED_VARS);
        clear_vars(&["TEAMDESK_NATURAL_API_KEY"]);
        result
    }
}
