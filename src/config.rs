use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    #[default]
    Postgres,
    Sqlite,
}

impl fmt::Display for DatabaseBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseBackend::Postgres => write!(f, "postgres"),
            DatabaseBackend::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl FromStr for DatabaseBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(DatabaseBackend::Postgres),
            "sqlite" => Ok(DatabaseBackend::Sqlite),
            other => bail!("Unknown database backend '{}' (expected postgres or sqlite)", other),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Deserialize, Clone, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
}

impl fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"<redacted>")
            .finish()
    }
}

/// Connection parameters for the conversation log database.
///
/// `path` is only read by the SQLite backend; the remaining fields only by
/// PostgreSQL.
#[derive(Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: DatabaseBackend,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseBackend::default(),
            host: default_host(),
            port: default_port(),
            name: String::new(),
            user: String::new(),
            password: String::new(),
            path: default_db_path(),
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("backend", &self.backend)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("path", &self.path)
            .finish()
    }
}

/// Connection target without credentials, safe to log.
impl fmt::Display for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.backend {
            DatabaseBackend::Postgres => {
                write!(f, "postgres://")?;
                if !self.user.is_empty() {
                    write!(f, "{}@", self.user)?;
                }
                write!(f, "{}:{}/{}", self.host, self.port, self.name)
            }
            DatabaseBackend::Sqlite => write!(f, "sqlite:{}", self.path.display()),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_db_path() -> PathBuf {
    PathBuf::from("conversations.db")
}

impl Config {
    /// Load the optional TOML file at `path`, then overlay environment variables.
    pub fn load(path: &Path) -> Result<Self> {
        let content = if path.exists() {
            Some(
                std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?,
            )
        } else {
            None
        };

        Self::from_sources(content.as_deref(), |key| std::env::var(key).ok())
    }

    /// Build a config from file contents and an environment lookup.
    /// Environment values win over the file; blank values count as unset.
    pub fn from_sources<F>(file: Option<&str>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config: Config = match file {
            Some(content) => toml::from_str(content).context("Failed to parse config file")?,
            None => Config::default(),
        };

        let lookup = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = lookup("TELEGRAM_BOT_TOKEN") {
            config.telegram.bot_token = token;
        }

        let db = &mut config.database;
        if let Some(backend) = lookup("DB_BACKEND") {
            db.backend = backend.parse()?;
        }
        if let Some(host) = lookup("DB_HOST") {
            db.host = host;
        }
        if let Some(port) = lookup("DB_PORT") {
            db.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid DB_PORT: {}", port))?;
        }
        if let Some(name) = lookup("DB_NAME") {
            db.name = name;
        }
        if let Some(user) = lookup("DB_USER") {
            db.user = user;
        }
        if let Some(password) = lookup("DB_PASSWORD") {
            db.password = password;
        }
        if let Some(path) = lookup("DB_PATH") {
            db.path = PathBuf::from(path);
        }

        if config.telegram.bot_token.trim().is_empty() {
            bail!("TELEGRAM_BOT_TOKEN not found in environment variables");
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_only_uses_defaults() {
        let config = Config::from_sources(None, env_of(&[("TELEGRAM_BOT_TOKEN", "abc")])).unwrap();
        assert_eq!(config.telegram.bot_token, "abc");
        assert_eq!(config.database.backend, DatabaseBackend::Postgres);
        assert_eq!(config.database.host, "localhost");
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.path, PathBuf::from("conversations.db"));
    }

    #[test]
    fn test_missing_token_is_fatal() {
        let err = Config::from_sources(None, env_of(&[("DB_HOST", "db")])).unwrap_err();
        assert!(err.to_string().contains("TELEGRAM_BOT_TOKEN"));
    }

    #[test]
    fn test_blank_token_is_fatal() {
        assert!(Config::from_sources(None, env_of(&[("TELEGRAM_BOT_TOKEN", "  ")])).is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let file = r#"
            [telegram]
            bot_token = "from-file"

            [database]
            host = "file-host"
            port = 6543
            name = "logs"
        "#;
        let config = Config::from_sources(
            Some(file),
            env_of(&[("DB_HOST", "env-host"), ("DB_USER", "bot")]),
        )
        .unwrap();
        assert_eq!(config.telegram.bot_token, "from-file");
        assert_eq!(config.database.host, "env-host");
        assert_eq!(config.database.port, 6543);
        assert_eq!(config.database.name, "logs");
        assert_eq!(config.database.user, "bot");
    }

    #[test]
    fn test_invalid_port_rejected() {
        let err = Config::from_sources(
            None,
            env_of(&[("TELEGRAM_BOT_TOKEN", "t"), ("DB_PORT", "fivefour")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("DB_PORT"));
    }

    #[test]
    fn test_sqlite_backend_from_env() {
        let config = Config::from_sources(
            None,
            env_of(&[
                ("TELEGRAM_BOT_TOKEN", "t"),
                ("DB_BACKEND", "SQLite"),
                ("DB_PATH", "/tmp/log.db"),
            ]),
        )
        .unwrap();
        assert_eq!(config.database.backend, DatabaseBackend::Sqlite);
        assert_eq!(config.database.to_string(), "sqlite:/tmp/log.db");
    }

    #[test]
    fn test_unknown_backend_rejected() {
        assert!(Config::from_sources(
            None,
            env_of(&[("TELEGRAM_BOT_TOKEN", "t"), ("DB_BACKEND", "mysql")]),
        )
        .is_err());
    }

    #[test]
    fn test_display_and_debug_hide_password() {
        let db = DatabaseConfig {
            user: "bot".to_string(),
            password: "hunter2".to_string(),
            name: "logs".to_string(),
            ..DatabaseConfig::default()
        };
        assert_eq!(db.to_string(), "postgres://bot@localhost:5432/logs");
        assert!(!format!("{:?}", db).contains("hunter2"));
    }
}
