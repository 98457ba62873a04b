use std::time::Duration;

use dotenvy::dotenv;
use std::env;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreBackend,
    pub database_url: String,
    pub port: u16,
    pub timeline_service_url: String,
    pub jwt_public_key_pem: String,
    /// Sockets stuck before the handshake completes are dropped after this.
    pub auth_timeout: Duration,
    pub message_page_size: i64,
    pub preload_message_limit: i64,
    pub max_message_length: Option<usize>,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let store = match env::var("STORE").as_deref() {
            Ok("memory") => StoreBackend::Memory,
            _ => StoreBackend::Postgres,
        };

        let database_url = match store {
            StoreBackend::Postgres => env::var("DATABASE_URL")
                .map_err(|_| AppError::Config("DATABASE_URL missing".into()))?,
            StoreBackend::Memory => env::var("DATABASE_URL").unwrap_or_default(),
        };

        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3000);

        let timeline_service_url = env::var("TIMELINE_SERVICE_URL")
            .map_err(|_| AppError::Config("TIMELINE_SERVICE_URL missing".into()))?;

        // public key inline or from file, validation-only on this side
        let jwt_public_key_pem = match env::var("JWT_PUBLIC_KEY_PEM") {
            Ok(pem) => pem,
            Err(_) => {
                let path = env::var("JWT_PUBLIC_KEY_FILE")
                    .map_err(|_| AppError::Config("JWT_PUBLIC_KEY_PEM missing".into()))?;
                std::fs::read_to_string(path)
                    .map_err(|e| AppError::Config(format!("read jwt pubkey file: {e}")))?
            }
        };

        let auth_timeout = Duration::from_secs(
            env::var("AUTH_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
        );

        let message_page_size = env::var("MESSAGE_PAGE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(50);

        let preload_message_limit = env::var("PRELOAD_MESSAGE_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(20);

        let max_message_length = env::var("MAX_MESSAGE_LENGTH")
            .ok()
            .and_then(|v| v.parse().ok());

        Ok(Self {
            store,
            database_url,
            port,
            timeline_service_url,
            jwt_public_key_pem,
            auth_timeout,
            message_page_size,
            preload_message_limit,
            max_message_length,
        })
    }

    pub fn test_defaults() -> Self {
        Self {
            store: StoreBackend::Memory,
            database_url: String::new(),
            port: 3000,
            timeline_service_url: "http://localhost:4000".into(),
            jwt_public_key_pem: String::new(),
            auth_timeout: Duration::from_secs(10),
            message_page_size: 50,
            preload_message_limit: 20,
            max_message_length: None,
        }
    }
}
