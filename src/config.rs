use std::env;

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub relay_url: String,
    pub username: Option<String>,
    pub stun_server: String,
    pub max_attachment_bytes: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self {
            relay_url: env::var("RELAY_URL")
                .unwrap_or_else(|_| "ws://127.0.0.1:8080".to_string()),
            username: env::var("CHAT_USERNAME").ok(),
            stun_server: env::var("STUN_SERVER")
                .unwrap_or_else(|_| "stun:stun.l.google.com:19302".to_string()),
            max_attachment_bytes: env::var("MAX_ATTACHMENT_BYTES")
                .unwrap_or_else(|_| "10485760".to_string())
                .parse()
                .unwrap_or(10 * 1024 * 1024),
            retry_attempts: env::var("RELAY_RETRY_ATTEMPTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            retry_delay_ms: env::var("RELAY_RETRY_DELAY_MS")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .unwrap_or(3000),
        }
    }
}
