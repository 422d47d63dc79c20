use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use pgbatch_core::error::CoreError;
use pgbatch_core::loader::DEFAULT_SCRIPT_FILE_PATH;
use pgbatch_db::pool::{
    DEFAULT_CONNECTIONS_MAX, DEFAULT_CONNECTIONS_MIN, DEFAULT_MAX_IDLE_LIFETIME,
};
use pgbatch_db::postgres::DEFAULT_CONNECT_TIMEOUT;
use pgbatch_db::{PgSettings, PoolBounds, PoolOptions};

/// Runner configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Connection target and connect timeout.
    pub database: PgSettings,
    /// Pool bounds and idle lifetime.
    pub pool: PoolOptions,
    /// Requested worker concurrency. The scheduler clamps it to the pool's `max`.
    pub concurrency: usize,
    /// Default statement timeout; a script's own `timeout` takes precedence.
    pub command_timeout: Option<Duration>,
    /// Location of `scripts.yml`.
    pub script_file: PathBuf,
}

impl RunnerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                       | Default                    |
    /// |-------------------------------|----------------------------|
    /// | `DATABASE_HOST`               | `localhost`                |
    /// | `DATABASE_PORT`               | `5432`                     |
    /// | `DATABASE_DB`                 | required                   |
    /// | `DATABASE_USER`               | required                   |
    /// | `DATABASE_PASSWORD`           | required                   |
    /// | `DATABASE_CONNECTIONS_MIN`    | `1`                        |
    /// | `DATABASE_CONNECTIONS_MAX`    | `10`                       |
    /// | `DATABASE_CONNECTION_TIMEOUT` | `10` (seconds)             |
    /// | `DATABASE_COMMAND_TIMEOUT`    | unset (no timeout)         |
    /// | `DATABASE_IDLE_LIFETIME`      | `300` (seconds)            |
    /// | `ASYNC_CONCURRENT_MAX`        | `DATABASE_CONNECTIONS_MAX` |
    /// | `SCRIPT_FILE_PATH`            | `./config/scripts.yml`     |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Blank values are treated as unset.
    pub fn from_vars<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let database = PgSettings {
            host: env.get("DATABASE_HOST").unwrap_or_else(|| "localhost".into()),
            port: env.parse_or("DATABASE_PORT", 5432u16)?,
            database: env.required("DATABASE_DB")?,
            user: env.required("DATABASE_USER")?,
            password: env.required("DATABASE_PASSWORD")?,
            connect_timeout: env
                .secs("DATABASE_CONNECTION_TIMEOUT")?
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT),
        };

        let min = env.parse_or("DATABASE_CONNECTIONS_MIN", DEFAULT_CONNECTIONS_MIN)?;
        let max = env.parse_or("DATABASE_CONNECTIONS_MAX", DEFAULT_CONNECTIONS_MAX)?;
        let idle_lifetime = env
            .secs("DATABASE_IDLE_LIFETIME")?
            .unwrap_or(DEFAULT_MAX_IDLE_LIFETIME);
        let pool = PoolOptions::new(PoolBounds::new(min, max)?)
            .max_idle_lifetime(Some(idle_lifetime));

        let concurrency = env.parse_or("ASYNC_CONCURRENT_MAX", max)?;
        if concurrency < 1 {
            return Err(CoreError::config("ASYNC_CONCURRENT_MAX must be at least 1"));
        }

        Ok(Self {
            database,
            pool,
            concurrency,
            command_timeout: env.secs("DATABASE_COMMAND_TIMEOUT")?,
            script_file: env
                .get("SCRIPT_FILE_PATH")
                .unwrap_or_else(|| DEFAULT_SCRIPT_FILE_PATH.into())
                .into(),
        })
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, CoreError> {
        self.get(key)
            .ok_or_else(|| CoreError::config(format!("{key} environment variable is required")))
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, CoreError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            Some(raw) => raw
                .parse()
                .map_err(|e| CoreError::config(format!("{key}={raw:?} is invalid: {e}"))),
            None => Ok(default),
        }
    }

    /// Positive number of seconds.
    fn secs(&self, key: &str) -> Result<Option<Duration>, CoreError> {
        match self.get(key) {
            Some(_) => {
                let secs: u64 = self.parse_or(key, 0)?;
                if secs == 0 {
                    return Err(CoreError::config(format!("{key} must be greater than 0")));
                }
                Ok(Some(Duration::from_secs(secs)))
            }
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<RunnerConfig, CoreError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RunnerConfig::from_vars(|key| vars.get(key).cloned())
    }

    const CREDENTIALS: [(&str, &str); 3] = [
        ("DATABASE_DB", "reports"),
        ("DATABASE_USER", "batch"),
        ("DATABASE_PASSWORD", "secret"),
    ];

    #[test]
    fn defaults_apply() {
        let config = load(&CREDENTIALS).unwrap();
        assert_eq!(config.database.host, "localhost");
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.pool.bounds().min(), 1);
        assert_eq!(config.pool.bounds().max(), 10);
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.command_timeout, None);
        assert_eq!(config.script_file, PathBuf::from("./config/scripts.yml"));
    }

    #[test]
    fn overrides_apply() {
        let mut vars = CREDENTIALS.to_vec();
        vars.extend([
            ("DATABASE_HOST", "db.internal"),
            ("DATABASE_PORT", "6432"),
            ("DATABASE_CONNECTIONS_MIN", "2"),
            ("DATABASE_CONNECTIONS_MAX", "4"),
            ("DATABASE_COMMAND_TIMEOUT", "45"),
            ("ASYNC_CONCURRENT_MAX", "3"),
            ("SCRIPT_FILE_PATH", "/etc/pgbatch/scripts.yml"),
        ]);
        let config = load(&vars).unwrap();
        assert_eq!(config.database.host, "db.internal");
        assert_eq!(config.database.port, 6432);
        assert_eq!(config.pool.bounds(), PoolBounds::new(2, 4).unwrap());
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.command_timeout, Some(Duration::from_secs(45)));
        assert_eq!(config.script_file, PathBuf::from("/etc/pgbatch/scripts.yml"));
    }

    #[test]
    fn concurrency_defaults_to_pool_max() {
        let mut vars = CREDENTIALS.to_vec();
        vars.push(("DATABASE_CONNECTIONS_MAX", "3"));
        assert_eq!(load(&vars).unwrap().concurrency, 3);
    }

    #[test]
    fn missing_credentials_rejected() {
        let err = load(&[("DATABASE_DB", "reports")]).unwrap_err();
        assert_matches!(err, CoreError::Configuration(msg) if msg.contains("DATABASE_USER"));
    }

    #[test]
    fn blank_value_counts_as_unset() {
        let mut vars = CREDENTIALS.to_vec();
        vars.push(("DATABASE_HOST", "  "));
        assert_eq!(load(&vars).unwrap().database.host, "localhost");
    }

    #[test]
    fn min_above_max_rejected() {
        let mut vars = CREDENTIALS.to_vec();
        vars.extend([("DATABASE_CONNECTIONS_MIN", "5"), ("DATABASE_CONNECTIONS_MAX", "2")]);
        assert!(load(&vars).is_err());
    }

    #[test]
    fn zero_timeout_rejected() {
        let mut vars = CREDENTIALS.to_vec();
        vars.push(("DATABASE_COMMAND_TIMEOUT", "0"));
        assert!(load(&vars).is_err());
    }

    #[test]
    fn non_numeric_port_rejected() {
        let mut vars = CREDENTIALS.to_vec();
        vars.push(("DATABASE_PORT", "fivefourthreetwo"));
        let err = load(&vars).unwrap_err();
        assert_matches!(err, CoreError::Configuration(msg) if msg.contains("DATABASE_PORT"));
    }

    #[test]
    fn zero_concurrency_rejected() {
        let mut vars = CREDENTIALS.to_vec();
        vars.push(("ASYNC_CONCURRENT_MAX", "0"));
        assert!(load(&vars).is_err());
    }
}
