use std::{borrow::Cow, time::Duration};

/// Process configuration
///
/// Built once at startup and handed to the store and the domain logic. Every value can be
/// given as a command-line flag or through the environment.
#[derive(Clone, Debug, PartialEq, Eq, clap::Args)]
pub struct Config {
    /// Ledger database, e.g. `sqlite:points.db`
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:points.db")]
    pub database_url: String,

    /// Size of the database connection pool
    #[arg(long = "max-db-connections", env = "MAX_DB_CONNECTIONS", default_value_t = 30)]
    pub max_connections: u32,

    /// Seconds an idle pooled connection is kept open
    #[arg(long = "max-idle-time", env = "MAX_IDLE_TIME", default_value_t = 15)]
    pub max_idle_time_secs: u64,

    /// Milliseconds a writer waits for the database lock before giving up
    #[arg(long, env = "BUSY_TIMEOUT_MS", default_value_t = 5_000)]
    pub busy_timeout_ms: u64,

    /// Upper bound in milliseconds for a single ledger operation
    #[arg(long, env = "TRANSACTION_TIMEOUT_MS", default_value_t = 10_000)]
    pub transaction_timeout_ms: u64,

    #[arg(long = "app-env", env = "APP_ENV", default_value = "development")]
    pub environment: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite:points.db".to_string(),
            max_connections: 30,
            max_idle_time_secs: 15,
            busy_timeout_ms: 5_000,
            transaction_timeout_ms: 10_000,
            environment: "development".to_string(),
        }
    }
}

impl Config {
    pub fn with_database_url(mut self, database_url: impl Into<String>) -> Self {
        self.database_url = database_url.into();
        self
    }

    pub fn max_idle_time(&self) -> Duration {
        Duration::from_secs(self.max_idle_time_secs)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if self.database_url.trim().is_empty() {
            return Err(InvalidConfig("database url is empty".into()));
        }
        if self.max_connections == 0 {
            return Err(InvalidConfig("max connections must be at least 1".into()));
        }
        if self.busy_timeout_ms == 0 || self.transaction_timeout_ms == 0 {
            return Err(InvalidConfig("timeouts must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid configuration: {0}")]
pub struct InvalidConfig(Cow<'static, str>);
