use std::str::FromStr;
use std::time::Duration;

use crate::fal::{FAL_QUEUE_URL, FAL_RUN_URL};
use crate::jobs::JobSettings;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} has an invalid value {value:?}: {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0}")]
    Inconsistent(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Http,
    Stdio,
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "http" | "streamable-http" => Ok(Self::Http),
            "stdio" => Ok(Self::Stdio),
            other => Err(format!("unknown transport {other:?}, expected http or stdio")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FalSettings {
    pub api_key: Option<String>,
    pub run_base_url: String,
    pub queue_base_url: String,
    pub http_timeout: Duration,
}

impl Default for FalSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            run_base_url: FAL_RUN_URL.to_string(),
            queue_base_url: FAL_QUEUE_URL.to_string(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub transport: Transport,
    pub port: u16,
    pub secret_key: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            transport: Transport::Http,
            port: DEFAULT_PORT,
            secret_key: None,
        }
    }
}

impl ServerSettings {
    pub fn bind_address(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    pub fn mcp_path(&self) -> String {
        match self.secret_key.as_deref() {
            Some(secret) => format!("/{secret}/mcp"),
            None => "/mcp".to_string(),
        }
    }
}

/// Process configuration, read once at start-up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub fal: FalSettings,
    pub jobs: JobSettings,
    pub server: ServerSettings,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Config::default();

        let fal = FalSettings {
            api_key: var("FAL_KEY"),
            run_base_url: var("FAL_RUN_URL").unwrap_or(defaults.fal.run_base_url),
            queue_base_url: var("FAL_QUEUE_URL").unwrap_or(defaults.fal.queue_base_url),
            http_timeout: parse(&var, "FAL_HTTP_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.fal.http_timeout),
        };

        let jobs = JobSettings {
            per_call_timeout: parse(&var, "FAL_FAST_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.jobs.per_call_timeout),
            overall_timeout: parse(&var, "FAL_QUEUE_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.jobs.overall_timeout),
            poll_interval: parse(&var, "FAL_POLL_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.jobs.poll_interval),
            max_poll_retries: parse(&var, "FAL_POLL_RETRIES")?
                .unwrap_or(defaults.jobs.max_poll_retries),
            max_in_flight_jobs: parse(&var, "FAL_MAX_QUEUED_JOBS")?
                .unwrap_or(defaults.jobs.max_in_flight_jobs),
        };

        let server = ServerSettings {
            transport: parse(&var, "MCP_TRANSPORT")?.unwrap_or(defaults.server.transport),
            port: parse(&var, "MCP_PORT")?.unwrap_or(defaults.server.port),
            secret_key: var("SECRET_KEY"),
        };

        let config = Config { fal, jobs, server };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let jobs = &self.jobs;
        if jobs.per_call_timeout.is_zero() {
            return Err(ConfigError::Inconsistent(
                "fast job timeout must be greater than zero".to_string(),
            ));
        }
        if jobs.poll_interval.is_zero() {
            return Err(ConfigError::Inconsistent(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        if jobs.overall_timeout <= jobs.poll_interval {
            return Err(ConfigError::Inconsistent(format!(
                "queued job timeout ({:?}) must exceed the poll interval ({:?})",
                jobs.overall_timeout, jobs.poll_interval
            )));
        }
        if jobs.max_poll_retries == 0 || jobs.max_in_flight_jobs == 0 {
            return Err(ConfigError::Inconsistent(
                "poll retries and queued job slots must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse<T, F>(var: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = var(name) else {
        return Ok(None);
    };
    value
        .parse::<T>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            name,
            value,
            reason: err.to_string(),
        })
}
