//! Configuration management for the annotation server

use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub channel: ChannelConfig,
    pub annotations: AnnotationConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    /// Events buffered per document channel before slow members lag
    pub capacity: usize,
    /// Events queued per connection before its forwarders wait
    pub outbound_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnnotationConfig {
    /// Window in which a repeated idempotency key is treated as a retry
    pub dedup_window_secs: u64,
    pub max_comment_chars: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    pub max_bytes: usize,
}

impl AnnotationConfig {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: 10,
            max_comment_chars: 4000,
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            outbound_capacity: 64,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
            },
            database: DatabaseConfig {
                url: "sqlite:./annotations.db".to_string(),
            },
            channel: ChannelConfig::default(),
            annotations: AnnotationConfig::default(),
            upload: UploadConfig {
                max_bytes: 5 * 1024 * 1024,
            },
        }
    }
}

impl Config {
    /// Read configuration from the environment, falling back to defaults per key
    pub fn from_env() -> Self {
        let defaults = Config::default();

        Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_var("SERVER_PORT", defaults.server.port),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
            },
            channel: ChannelConfig {
                capacity: parse_var("CHANNEL_CAPACITY", defaults.channel.capacity).max(1),
                outbound_capacity: parse_var(
                    "CHANNEL_OUTBOUND_CAPACITY",
                    defaults.channel.outbound_capacity,
                )
                .max(1),
            },
            annotations: AnnotationConfig {
                dedup_window_secs: parse_var(
                    "ANNOTATION_DEDUP_WINDOW_SECS",
                    defaults.annotations.dedup_window_secs,
                ),
                max_comment_chars: parse_var(
                    "ANNOTATION_MAX_COMMENT_CHARS",
                    defaults.annotations.max_comment_chars,
                ),
            },
            upload: UploadConfig {
                max_bytes: parse_var("UPLOAD_MAX_BYTES", defaults.upload.max_bytes),
            },
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Ignoring unparsable config value");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.annotations.dedup_window(), Duration::from_secs(10));
        assert!(config.channel.capacity > 0);
    }

    #[test]
    fn test_parse_var_falls_back_on_garbage() {
        env::set_var("ANNOTATION_TEST_PORT", "not-a-number");
        assert_eq!(parse_var("ANNOTATION_TEST_PORT", 42u16), 42);
        env::set_var("ANNOTATION_TEST_PORT", "4242");
        assert_eq!(parse_var("ANNOTATION_TEST_PORT", 42u16), 4242);
        env::remove_var("ANNOTATION_TEST_PORT");
    }
}
