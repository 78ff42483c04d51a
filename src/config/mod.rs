use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub pipeline: PipelineConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub connection_timeout_secs: u64,
    pub enable_query_logging: bool,
}

/// Limits applied by the mapper and hook dispatchers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Largest accepted batch for the `*Many` operations
    pub max_batch_size: usize,
    /// Page size for ReadMany when the request gives no limit
    pub default_page_limit: i64,
    /// Hard cap on any requested page size
    pub max_page_limit: i64,
    /// Hooks slower than this are logged at warn level
    pub slow_hook_threshold_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        AppConfig::development().pipeline
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
    pub enable_cors: bool,
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
            self.database.url = Some(v);
        }
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout_secs = v.parse().unwrap_or(self.database.connection_timeout_secs);
        }
        if let Ok(v) = env::var("DATABASE_ENABLE_QUERY_LOGGING") {
            self.database.enable_query_logging = v.parse().unwrap_or(self.database.enable_query_logging);
        }

        // Pipeline overrides
        if let Ok(v) = env::var("PIPELINE_MAX_BATCH_SIZE") {
            self.pipeline.max_batch_size = v.parse().unwrap_or(self.pipeline.max_batch_size);
        }
        if let Ok(v) = env::var("PIPELINE_DEFAULT_PAGE_LIMIT") {
            self.pipeline.default_page_limit = v.parse().unwrap_or(self.pipeline.default_page_limit);
        }
        if let Ok(v) = env::var("PIPELINE_MAX_PAGE_LIMIT") {
            self.pipeline.max_page_limit = v.parse().unwrap_or(self.pipeline.max_page_limit);
        }
        if let Ok(v) = env::var("PIPELINE_SLOW_HOOK_THRESHOLD_MS") {
            self.pipeline.slow_hook_threshold_ms = v.parse().unwrap_or(self.pipeline.slow_hook_threshold_ms);
        }

        // API overrides
        if let Some(v) = env::var("REST_MAPPER_PORT").ok().or_else(|| env::var("PORT").ok()) {
            self.api.port = v.parse().unwrap_or(self.api.port);
        }
        if let Ok(v) = env::var("API_ENABLE_CORS") {
            self.api.enable_cors = v.parse().unwrap_or(self.api.enable_cors);
        }

        self
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            database: DatabaseConfig {
                url: None,
                max_connections: 10,
                connection_timeout_secs: 30,
                enable_query_logging: true,
            },
            pipeline: PipelineConfig {
                max_batch_size: 1000,
                default_page_limit: 100,
                max_page_limit: 1000,
                slow_hook_threshold_ms: 100,
            },
            api: ApiConfig {
                port: 3000,
                enable_cors: true,
            },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            database: DatabaseConfig {
                url: None,
                max_connections: 20,
                connection_timeout_secs: 10,
                enable_query_logging: true,
            },
            pipeline: PipelineConfig {
                max_batch_size: 500,
                default_page_limit: 50,
                max_page_limit: 500,
                slow_hook_threshold_ms: 250,
            },
            api: ApiConfig {
                port: 3000,
                enable_cors: true,
            },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            database: DatabaseConfig {
                url: None,
                max_connections: 50,
                connection_timeout_secs: 5,
                enable_query_logging: false,
            },
            pipeline: PipelineConfig {
                max_batch_size: 100,
                default_page_limit: 25,
                max_page_limit: 100,
                slow_hook_threshold_ms: 500,
            },
            api: ApiConfig {
                port: 8080,
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

#[macro_export]
macro_rules! is_production {
    () => {
        matches!($crate::config::CONFIG.environment, $crate::config::Environment::Production)
    };
}
