use std::{path::Path, str::FromStr, time::Duration};

use config::{Config, ConfigError, Environment, File};
use serde::{de, Deserialize, Deserializer};
use tracing::Level;

#[derive(Debug, Deserialize)]
pub struct Settings {
    database: Database,
    smtp: Smtp,
    scheduler: Option<Scheduler>,
    queue: Option<Queue>,
    logging: Option<Logging>,
}

#[derive(Debug, Deserialize)]
struct Database {
    r#type: String,
    user: Option<String>,
    pass: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    db_name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Smtp {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    #[serde(default)]
    pub tls: SmtpTls,
    #[serde(default = "default_smtp_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SmtpTls {
    #[default]
    Tls,
    Starttls,
    None,
}

#[derive(Debug, Deserialize)]
struct Scheduler {
    #[serde(default = "default_interval")]
    interval_seconds: u64,
    #[serde(default = "default_stale_after")]
    stale_after_seconds: u64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Queue {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
}

#[derive(Debug, Deserialize)]
struct Logging {
    #[serde(deserialize_with = "deserialize_level")]
    level: Level,
}

fn deserialize_level<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Level, D::Error> {
    let level = String::deserialize(deserializer)?;
    Level::from_str(&level).map_err(|e| de::Error::custom(format!("logging level {level}: {e}")))
}

fn default_smtp_port() -> u16 {
    465
}

fn default_smtp_timeout() -> u64 {
    10
}

fn default_interval() -> u64 {
    60
}

fn default_stale_after() -> u64 {
    3_600
}

fn default_concurrency() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_cap_ms() -> u64 {
    300_000
}

impl Default for Queue {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
        }
    }
}

impl Settings {
    /// Reads the TOML file at `path`, then applies `MAILING__SECTION__KEY`
    /// environment overrides.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix("MAILING").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    /// Default location, `/etc/mailing_service.toml`.
    pub fn default_path() -> String {
        format!("/etc/{}.toml", env!("CARGO_PKG_NAME"))
    }

    pub fn get_db_url(&self) -> String {
        let db = &self.database;
        if db.r#type == "sqlite" {
            return if db.db_name == ":memory:" {
                "sqlite::memory:".to_string()
            } else {
                format!("sqlite://{}?mode=rwc", db.db_name)
            };
        }

        format!(
            "{}://{}:{}@{}:{}/{}",
            db.r#type,
            db.user.as_deref().unwrap_or_default(),
            db.pass.as_deref().unwrap_or_default(),
            db.host.as_deref().unwrap_or("localhost"),
            db.port.unwrap_or(5432),
            db.db_name,
        )
    }

    pub fn get_smtp(&self) -> &Smtp {
        &self.smtp
    }

    pub fn get_from_address(&self) -> &str {
        &self.smtp.from
    }

    pub fn get_scheduler_interval(&self) -> Duration {
        match &self.scheduler {
            Some(scheduler) => Duration::from_secs(scheduler.interval_seconds.max(1)),
            None => Duration::from_secs(default_interval()),
        }
    }

    /// How long a mailing may sit in `running` before it is handed back.
    pub fn get_stale_after(&self) -> Duration {
        match &self.scheduler {
            Some(scheduler) => Duration::from_secs(scheduler.stale_after_seconds),
            None => Duration::from_secs(default_stale_after()),
        }
    }

    pub fn get_queue(&self) -> Queue {
        self.queue.unwrap_or_default()
    }

    pub fn get_log_level(&self) -> Level {
        self.logging.as_ref().map_or(Level::INFO, |logging| logging.level)
    }
}
