use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use teamdesk_core::config::{AppConfig, LoadOptions};
use toml::Value;

/// One printed setting: dotted key, rendered value, and the env var that can override it.
struct Setting {
    key: &'static str,
    value: String,
    env_key: &'static str,
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for setting in settings(&config) {
        let source = field_source(
            setting.key,
            setting.env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(setting.key, &setting.value, source));
    }
    lines.join("\n")
}

fn settings(config: &AppConfig) -> Vec<Setting> {
    let setting = |key, value: String, env_key| Setting { key, value, env_key };
    vec![
        setting("discord.bot_token", redact_token(&config.discord.bot_token), "TEAMDESK_DISCORD_BOT_TOKEN"),
        setting(
            "discord.application_id",
            config.discord.application_id.clone().unwrap_or_else(|| "<unset>".to_string()),
            "TEAMDESK_DISCORD_APPLICATION_ID",
        ),
        setting("discord.guild_id", config.discord.guild_id.clone(), "TEAMDESK_DISCORD_GUILD_ID"),
        setting("discord.sync_commands", config.discord.sync_commands.to_string(), "TEAMDESK_DISCORD_SYNC_COMMANDS"),
        setting("storage.data_dir", config.storage.data_dir.display().to_string(), "TEAMDESK_DATA_DIR"),
        setting("database.url", config.database.url.clone(), "TEAMDESK_DATABASE_URL"),
        setting(
            "database.max_connections",
            config.database.max_connections.to_string(),
            "TEAMDESK_DATABASE_MAX_CONNECTIONS",
        ),
        setting("database.timeout_secs", config.database.timeout_secs.to_string(), "TEAMDESK_DATABASE_TIMEOUT_SECS"),
        setting("natural.enabled", config.natural.enabled.to_string(), "TEAMDESK_NATURAL_ENABLED"),
        setting("natural.api_key", redact_optional(config.natural.api_key.as_ref()), "TEAMDESK_NATURAL_API_KEY"),
        setting("natural.base_url", config.natural.base_url.clone(), "TEAMDESK_NATURAL_BASE_URL"),
        setting("natural.model", config.natural.model.clone(), "TEAMDESK_NATURAL_MODEL"),
        setting("server.enabled", config.server.enabled.to_string(), "TEAMDESK_SERVER_ENABLED"),
        setting("server.bind_address", config.server.bind_address.clone(), "TEAMDESK_SERVER_BIND_ADDRESS"),
        setting("server.port", config.server.port.to_string(), "TEAMDESK_SERVER_PORT"),
        setting("server.public_url", config.server.public_url.clone(), "TEAMDESK_SERVER_PUBLIC_URL"),
        setting("server.jwt_secret", redact_optional(config.server.jwt_secret.as_ref()), "TEAMDESK_JWT_SECRET"),
        setting(
            "calendar.refresh_interval_secs",
            config.calendar.refresh_interval_secs.to_string(),
            "TEAMDESK_CALENDAR_REFRESH_SECS",
        ),
        setting(
            "flow.confirmation_timeout_secs",
            config.flow.confirmation_timeout_secs.to_string(),
            "TEAMDESK_FLOW_TIMEOUT_SECS",
        ),
        setting("timezone", format!("{:?}", config.timezone), "TEAMDESK_TIMEZONE"),
        setting("logging.level", config.logging.level.clone(), "TEAMDESK_LOGGING_LEVEL"),
        setting("logging.format", format!("{:?}", config.logging.format), "TEAMDESK_LOGGING_FORMAT"),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    ["teamdesk.toml", "config/teamdesk.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps the first few characters so operators can tell tokens apart.
fn redact_token(token: &SecretString) -> String {
    let trimmed = token.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    let prefix: String = trimmed.chars().take(4).collect();
    format!("{prefix}***")
}

fn redact_optional(secret: Option<&SecretString>) -> String {
    match secret {
        Some(secret) if !secret.expose_secret().trim().is_empty() => "<redacted>".to_string(),
        _ => "<unset>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use toml::Value;

    use super::{contains_path, redact_optional, redact_token};

    #[test]
    fn tokens_keep_only_a_short_prefix() {
        assert_eq!(redact_token(&SecretString::from("MTIzNDU2.abc.def".to_string())), "MTIz***");
        assert_eq!(redact_token(&SecretString::from("  ".to_string())), "<empty>");
        assert_eq!(redact_optional(None), "<unset>");
        assert_eq!(redact_optional(Some(&SecretString::from("k".to_string()))), "<redacted>");
    }

    #[test]
    fn nested_keys_are_found_in_the_file_document() {
        let doc: Value = "[discord]\nguild_id = \"1\"\n".parse().expect("toml");
        assert!(contains_path(&doc, "discord.guild_id"));
        assert!(!contains_path(&doc, "discord.bot_token"));
    }
}
