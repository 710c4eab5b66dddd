use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,
    /// Maximum database connections in pool
    pub database_max_connections: u32,
    /// Deadline for acquiring a pooled connection, in seconds
    pub database_acquire_timeout_secs: u64,
    /// Redis connection URL for the shared counter store (optional; falls
    /// back to the in-process store when unset)
    pub redis_url: Option<String>,
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Secret used to verify bearer tokens on rate-limited routes
    pub token_secret: String,
    /// Maximum requests per identity per rate-limit window
    pub rate_limit_max_requests: u64,
    /// Rate-limit window length in seconds
    pub rate_limit_window_secs: u64,
    /// Local hour of day (0-23) at which the daily ban report is sent
    pub ban_report_hour: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::MissingEnvVar("DATABASE_URL"))?;

        let database_max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("DATABASE_MAX_CONNECTIONS"))?;

        let database_acquire_timeout_secs = env::var("DATABASE_ACQUIRE_TIMEOUT_SECS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("DATABASE_ACQUIRE_TIMEOUT_SECS"))?;

        let redis_url = env::var("REDIS_URL").ok();

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("PORT"))?;

        let token_secret =
            env::var("TOKEN_SECRET").map_err(|_| ConfigError::MissingEnvVar("TOKEN_SECRET"))?;

        let rate_limit_max_requests = env::var("RATE_LIMIT_MAX_REQUESTS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("RATE_LIMIT_MAX_REQUESTS"))?;

        let rate_limit_window_secs = env::var("RATE_LIMIT_WINDOW_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("RATE_LIMIT_WINDOW_SECS"))?;

        let ban_report_hour: u32 = env::var("BAN_REPORT_HOUR")
            .unwrap_or_else(|_| "6".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("BAN_REPORT_HOUR"))?;

        if ban_report_hour > 23 {
            return Err(ConfigError::InvalidValue("BAN_REPORT_HOUR"));
        }

        Ok(Self {
            database_url,
            database_max_connections,
            database_acquire_timeout_secs,
            redis_url,
            host,
            port,
            token_secret,
            rate_limit_max_requests,
            rate_limit_window_secs,
            ban_report_hour,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
