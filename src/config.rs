use std::env;
use std::path::PathBuf;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Port to listen on
    pub port: u16,
    /// Bind address (0.0.0.0 for LAN, 127.0.0.1 for localhost)
    pub bind_addr: String,
    /// Path to the pre-trained ONNX classifier artifact
    pub model_path: PathBuf,
    /// Number of readings in the classification window
    pub window_size: usize,
    /// Minimum non-zero samples before the classifier is consulted
    pub min_valid_signals: usize,
    /// Consecutive anomalous windows required to escalate an alert
    pub alert_threshold: u32,
    /// Seconds without device traffic before the session is declared dead
    pub heartbeat_timeout_seconds: i64,
    /// Heartbeat monitor check period in seconds
    pub monitor_interval_seconds: u64,
}

impl RelayConfig {
    /// Load configuration from environment variables. The model path is the
    /// one required setting; everything else has a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let model_path = env::var("ECG_MODEL_PATH")
            .map(PathBuf::from)
            .map_err(|_| ConfigError::MissingEnvVar("ECG_MODEL_PATH".to_string()))?;

        let window_size: usize = env::var("WINDOW_SIZE")
            .unwrap_or_else(|_| "95".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("WINDOW_SIZE must be a positive integer".to_string()))?;
        if window_size == 0 {
            return Err(ConfigError::InvalidValue(
                "WINDOW_SIZE must be at least 1".to_string(),
            ));
        }

        let min_valid_signals: usize = env::var("MIN_VALID_SIGNALS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);
        if min_valid_signals > window_size {
            return Err(ConfigError::InvalidValue(
                "MIN_VALID_SIGNALS cannot exceed WINDOW_SIZE".to_string(),
            ));
        }

        Ok(Self {
            port: env::var("ECG_RELAY_PORT")
                .unwrap_or_else(|_| "8765".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidPort)?,
            bind_addr: env::var("ECG_RELAY_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string()),
            model_path,
            window_size,
            min_valid_signals,
            alert_threshold: env::var("ALERT_THRESHOLD")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .unwrap_or(3),
            heartbeat_timeout_seconds: env::var("HEARTBEAT_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            monitor_interval_seconds: env::var("MONITOR_INTERVAL_SECONDS")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .unwrap_or(1),
        })
    }

    /// Get the full bind address (addr:port)
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid port number")]
    InvalidPort,
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}
