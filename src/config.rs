//! Environment-backed configuration, loaded once at boot.
//! A `.env` file is honoured in development; every knob has a
//! sensible default so a bare `cargo run` works.

use std::env;
use std::net::SocketAddr;

const DEFAULT_JWT_SECRET: &str = "taskflow-dev-secret-change-in-production";

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub db_path: String,
    pub jwt_secret: String,
    /// Bootstrap superadmin identity, used only on an empty database.
    pub seed_email: String,
    pub seed_otp: String,
}

impl Config {
    pub fn load() -> Self {
        dotenvy::dotenv().ok();

        let addr = env::var("TASKFLOW_ADDR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

        let jwt_secret = env::var("TASKFLOW_JWT_SECRET").unwrap_or_else(|_| {
            tracing::warn!("TASKFLOW_JWT_SECRET not set, using the dev default");
            DEFAULT_JWT_SECRET.to_string()
        });

        Config {
            addr,
            db_path: env::var("TASKFLOW_DB").unwrap_or_else(|_| "taskflow.redb".to_string()),
            jwt_secret,
            seed_email: env::var("TASKFLOW_SEED_EMAIL")
                .unwrap_or_else(|_| "admin@taskflow.local".to_string()),
            seed_otp: env::var("TASKFLOW_SEED_OTP").unwrap_or_else(|_| "123456".to_string()),
        }
    }
}
