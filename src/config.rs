use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_PATH_ENV: &str = "DATAFLOW_CONFIG";
const BIND_ENV: &str = "DATAFLOW_BIND";
const DATA_DIR_ENV: &str = "DATAFLOW_DATA_DIR";
const REQUEST_TIMEOUT_ENV: &str = "DATAFLOW_REQUEST_TIMEOUT_SECS";
const DEFAULT_CONFIG_FILE: &str = "dataflow.yaml";

/// Demo credentials shipped with the dashboard. Hashed on load; only the hash
/// ever reaches the directory.
const DEFAULT_DEMO_ACCOUNTS: [(&str, &str, &str, &str); 4] = [
    ("admin@dataflow.com", "admin123", "Admin User", "Administrator"),
    ("demo@dataflow.com", "password123", "Demo User", "Analyst"),
    ("manager@dataflow.com", "manager123", "Manager User", "Manager"),
    ("user@dataflow.com", "user123", "Standard User", "User"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DemoAccount {
    pub email: String,
    /// Hex blake3 digest of the password.
    pub password_hash: String,
    pub name: String,
    pub role: String,
}

impl DemoAccount {
    pub fn with_password(email: &str, password: &str, name: &str, role: &str) -> Self {
        Self {
            email: email.to_string(),
            password_hash: hash_password(password),
            name: name.to_string(),
            role: role.to_string(),
        }
    }
}

pub fn hash_password(password: &str) -> String {
    blake3::hash(password.as_bytes()).to_hex().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct OAuthSettings {
    pub authorize_url: String,
    pub client_id: String,
    pub redirect_uri: String,
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            authorize_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            client_id: "dataflow-dashboard".to_string(),
            redirect_uri: "http://localhost:5173/auth/callback".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct OAuthIdentity {
    pub email: String,
    pub name: String,
    pub role: String,
}

impl Default for OAuthIdentity {
    fn default() -> Self {
        Self {
            email: "google-user@dataflow.com".to_string(),
            name: "Google User".to_string(),
            role: "Analyst".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct DashboardConfig {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub session_cookie_name: String,
    pub session_max_age_days: u32,
    pub realtime_interval_ms: u64,
    pub request_timeout_secs: u64,
    pub login_delay_ms: u64,
    pub oauth: OAuthSettings,
    pub oauth_identity: OAuthIdentity,
    pub demo_accounts: Vec<DemoAccount>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8787".to_string(),
            data_dir: PathBuf::from("./data"),
            session_cookie_name: "dataflow_session_token".to_string(),
            session_max_age_days: 60,
            realtime_interval_ms: 5_000,
            request_timeout_secs: 15,
            login_delay_ms: 1_000,
            oauth: OAuthSettings::default(),
            oauth_identity: OAuthIdentity::default(),
            demo_accounts: DEFAULT_DEMO_ACCOUNTS
                .iter()
                .map(|(email, password, name, role)| DemoAccount::with_password(email, password, name, role))
                .collect(),
        }
    }
}

impl DashboardConfig {
    /// Defaults, then the YAML file (if any), then environment overrides.
    pub fn load() -> AppResult<Self> {
        let explicit = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
        let mut config = match explicit {
            Some(path) => Self::from_yaml_file(&path)?,
            None if fallback.exists() => Self::from_yaml_file(&fallback)?,
            None => Self::default(),
        };

        if let Ok(bind) = std::env::var(BIND_ENV) {
            config.bind_addr = bind;
        }
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(raw) = std::env::var(REQUEST_TIMEOUT_ENV) {
            config.request_timeout_secs = raw
                .trim()
                .parse()
                .map_err(|_| AppError::BadRequest(format!("{} must be a whole number of seconds", REQUEST_TIMEOUT_ENV)))?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> AppResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> AppResult<Self> {
        let config: Self = serde_yaml::from_str(raw)?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.realtime_interval_ms == 0 {
            return Err(AppError::BadRequest("realtime_interval_ms must be greater than zero".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(AppError::BadRequest("request_timeout_secs must be greater than zero".to_string()));
        }
        if self.demo_accounts.is_empty() {
            return Err(AppError::BadRequest("at least one demo account is required".to_string()));
        }
        Ok(())
    }

    pub fn realtime_interval(&self) -> Duration {
        Duration::from_millis(self.realtime_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn login_delay(&self) -> Duration {
        Duration::from_millis(self.login_delay_ms)
    }

    pub fn session_max_age_secs(&self) -> u64 {
        u64::from(self.session_max_age_days) * 24 * 60 * 60
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("dashboard.sqlite")
    }

    pub fn local_storage_dir(&self) -> PathBuf {
        self.data_dir.join("local-storage")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}
