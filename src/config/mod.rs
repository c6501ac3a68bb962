use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::tenant::resolver::DEFAULT_TENANT_HEADER;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `postgres://...` or `memory:` for the embedded backend
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    /// 0 disables
    pub idle_timeout_secs: u64,
    /// 0 disables
    pub max_lifetime_secs: u64,
    pub test_before_acquire: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
    pub tenant_header: String,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(skip_serializing, default)]
    pub jwt_secret: String,
    pub jwt_expiry_hours: u64,
    pub enable_cors: bool,
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn max_lifetime(&self) -> Option<Duration> {
        (self.max_lifetime_secs > 0).then(|| Duration::from_secs(self.max_lifetime_secs))
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Database overrides
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_ACQUIRE_TIMEOUT_SECS") {
            self.database.acquire_timeout_secs = v.parse().unwrap_or(self.database.acquire_timeout_secs);
        }
        if let Ok(v) = env::var("DATABASE_IDLE_TIMEOUT_SECS") {
            self.database.idle_timeout_secs = v.parse().unwrap_or(self.database.idle_timeout_secs);
        }
        if let Ok(v) = env::var("DATABASE_MAX_LIFETIME_SECS") {
            self.database.max_lifetime_secs = v.parse().unwrap_or(self.database.max_lifetime_secs);
        }
        if let Ok(v) = env::var("DATABASE_TEST_BEFORE_ACQUIRE") {
            self.database.test_before_acquire = v.parse().unwrap_or(self.database.test_before_acquire);
        }

        // API overrides
        if let Some(v) = env::var("API_PORT").ok().or_else(|| env::var("PORT").ok()) {
            self.api.port = v.parse().unwrap_or(self.api.port);
        }
        if let Ok(v) = env::var("API_TENANT_HEADER") {
            self.api.tenant_header = v.trim().to_ascii_lowercase();
        }
        if let Ok(v) = env::var("API_DEFAULT_PAGE_SIZE") {
            self.api.default_page_size = v.parse().unwrap_or(self.api.default_page_size);
        }
        if let Ok(v) = env::var("API_MAX_PAGE_SIZE") {
            self.api.max_page_size = v.parse().unwrap_or(self.api.max_page_size);
        }

        // Security overrides
        if let Ok(v) = env::var("SECURITY_JWT_SECRET") {
            self.security.jwt_secret = v;
        }
        if let Ok(v) = env::var("SECURITY_JWT_EXPIRY_HOURS") {
            self.security.jwt_expiry_hours = v.parse().unwrap_or(self.security.jwt_expiry_hours);
        }
        if let Ok(v) = env::var("SECURITY_ENABLE_CORS") {
            self.security.enable_cors = v.parse().unwrap_or(self.security.enable_cors);
        }

        self
    }

    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            database: DatabaseConfig {
                url: "memory:".to_string(),
                max_connections: 5,
                acquire_timeout_secs: 30,
                idle_timeout_secs: 600,
                max_lifetime_secs: 1800,
                test_before_acquire: true,
            },
            api: ApiConfig {
                port: 8080,
                tenant_header: DEFAULT_TENANT_HEADER.to_string(),
                default_page_size: 20,
                max_page_size: 1000,
            },
            security: SecurityConfig {
                jwt_secret: "development-secret".to_string(),
                jwt_expiry_hours: 24 * 7, // 1 week
                enable_cors: true,
            },
        }
    }

    pub fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            database: DatabaseConfig {
                url: String::new(),
                max_connections: 20,
                acquire_timeout_secs: 10,
                idle_timeout_secs: 600,
                max_lifetime_secs: 1800,
                test_before_acquire: true,
            },
            api: ApiConfig {
                port: 8080,
                tenant_header: DEFAULT_TENANT_HEADER.to_string(),
                default_page_size: 20,
                max_page_size: 500,
            },
            security: SecurityConfig {
                jwt_secret: String::new(),
                jwt_expiry_hours: 24,
                enable_cors: true,
            },
        }
    }

    pub fn production() -> Self {
        Self {
            environment: Environment::Production,
            database: DatabaseConfig {
                url: String::new(),
                max_connections: 50,
                acquire_timeout_secs: 5,
                idle_timeout_secs: 300,
                max_lifetime_secs: 1800,
                test_before_acquire: true,
            },
            api: ApiConfig {
                port: 8080,
                tenant_header: DEFAULT_TENANT_HEADER.to_string(),
                default_page_size: 20,
                max_page_size: 100,
            },
            security: SecurityConfig {
                jwt_secret: String::new(),
                jwt_expiry_hours: 4,
                enable_cors: false,
            },
        }
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}
