use std::time::Duration;

use crate::error::ConfigError;

/// Shortest signing secret accepted for HS256
pub const MIN_SECRET_LENGTH: usize = 32;

#[derive(serde::Deserialize, Clone, Debug)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub database: DatabaseSettings,
    pub jwt: JwtSettings,
    pub verification: VerificationSettings,
    pub storage: StorageSettings,
    pub email: EmailSettings,
    pub bans: BanSettings,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
}

#[derive(serde::Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
}

impl std::fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("username", &self.username)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database_name", &self.database_name)
            .finish_non_exhaustive()
    }
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name
        )
    }

    /// Connection string for the server itself, used to create databases
    pub fn connection_string_without_db(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}",
            self.username, self.password, self.host, self.port
        )
    }
}

/// JWT signing settings
#[derive(serde::Deserialize, Clone)]
pub struct JwtSettings {
    pub secret: String,
    pub access_token_expiry: i64,  // seconds (86400 = 24 hours)
    pub refresh_token_expiry: i64, // seconds (604800 = 7 days)
    pub issuer: String,
}

impl std::fmt::Debug for JwtSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtSettings")
            .field("access_token_expiry", &self.access_token_expiry)
            .field("refresh_token_expiry", &self.refresh_token_expiry)
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

impl JwtSettings {
    /// Reject settings the token service cannot run safely with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret.is_empty() {
            return Err(ConfigError::MissingRequired("jwt.secret".to_string()));
        }
        if self.secret.len() < MIN_SECRET_LENGTH {
            return Err(ConfigError::InvalidValue(format!(
                "jwt.secret must be at least {} bytes",
                MIN_SECRET_LENGTH
            )));
        }
        if self.access_token_expiry <= 0 || self.refresh_token_expiry <= 0 {
            return Err(ConfigError::InvalidValue(
                "token expiries must be positive".to_string(),
            ));
        }
        if self.refresh_token_expiry < self.access_token_expiry {
            return Err(ConfigError::InvalidValue(
                "jwt.refresh_token_expiry must not be shorter than jwt.access_token_expiry"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct VerificationSettings {
    /// Seconds a verification code stays valid
    pub code_ttl: i64,
}

impl VerificationSettings {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.code_ttl)
    }
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct StorageSettings {
    pub query_timeout_ms: u64,
}

impl StorageSettings {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct EmailSettings {
    pub base_url: String,
    pub sender: String,
    pub timeout_ms: u64,
}

impl EmailSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct BanSettings {
    /// Seconds between sweeps of expired bans
    pub sweep_interval: u64,
}

impl BanSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval)
    }
}

/// Load settings from `configuration.yaml` (optional) and `APP__SECTION__KEY`
/// environment variables, which take precedence.
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = config::Config::builder()
        .set_default("application.host", "127.0.0.1")?
        .set_default("application.port", 8080)?
        .set_default("jwt.access_token_expiry", 86_400)?
        .set_default("jwt.refresh_token_expiry", 604_800)?
        .set_default("jwt.issuer", "ocm_auth")?
        .set_default("verification.code_ttl", 86_400)?
        .set_default("storage.query_timeout_ms", 3_000)?
        .set_default("email.timeout_ms", 10_000)?
        .set_default("bans.sweep_interval", 3_600)?
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(settings.try_deserialize::<Settings>()?)
}
