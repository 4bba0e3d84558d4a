use crate::error::ServerError;
use std::env;

/// Configuration for the server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP and WebSocket listener.
    pub bind_addr: String,
    /// Allowed CORS origin. `None` allows any origin.
    pub cors_origin: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3001".to_string(),
            cors_origin: None,
        }
    }
}

impl ServerConfig {
    /// Build a config from the environment: `PORT` or `STUDYMATCH_ADDR` for
    /// the listener, `CORS_ORIGIN` to restrict browsers to one origin.
    pub fn from_env() -> Result<Self, ServerError> {
        let mut config = Self::default();

        if let Ok(port) = env::var("PORT") {
            let port: u16 = port
                .parse()
                .map_err(|_| ServerError::Config(format!("invalid PORT value: {port}")))?;
            config.bind_addr = format!("0.0.0.0:{port}");
        }
        if let Ok(addr) = env::var("STUDYMATCH_ADDR") {
            if !addr.is_empty() {
                config.bind_addr = addr;
            }
        }
        if let Ok(origin) = env::var("CORS_ORIGIN") {
            if !origin.is_empty() {
                config.cors_origin = Some(origin);
            }
        }

        Ok(config)
    }
}
