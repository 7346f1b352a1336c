use crate::constants::{
    DEFAULT_DEVICE_ID_OFFSET, DEFAULT_FRAME_DELAY_MS, DEFAULT_JPEG_QUALITY, DEFAULT_MAX_RETRIES,
    DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_MEDIUM_SIZE, DEFAULT_SMALL_SIZE,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_secret_key")]
    pub secret_key: String,
    #[serde(default = "default_device_id_offset")]
    pub device_id_offset: i64,
    /// Literal client addresses that resolve to the trusted-network level.
    #[serde(default)]
    pub trusted_networks: Vec<String>,
    /// Reverse proxies whose forwarding headers are believed. Forwarding
    /// headers from any other peer are ignored.
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
}

fn default_secret_key() -> String {
    "change-me-in-production-use-openssl-rand-hex-32".to_string()
}

fn default_device_id_offset() -> i64 {
    DEFAULT_DEVICE_ID_OFFSET
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            secret_key: default_secret_key(),
            device_id_offset: default_device_id_offset(),
            trusted_networks: Vec::new(),
            trusted_proxies: Vec::new(),
        }
    }
}

impl SecurityConfig {
    pub fn trusted_addresses(&self) -> Vec<IpAddr> {
        parse_addresses(&self.trusted_networks, "trusted network")
    }

    pub fn trusted_proxy_addresses(&self) -> Vec<IpAddr> {
        parse_addresses(&self.trusted_proxies, "trusted proxy")
    }
}

fn parse_addresses(entries: &[String], kind: &str) -> Vec<IpAddr> {
    entries
        .iter()
        .filter_map(|entry| match entry.trim().parse::<IpAddr>() {
            Ok(ip) => Some(ip.to_canonical()),
            Err(_) => {
                tracing::warn!("Ignoring invalid {} entry: {}", kind, entry);
                None
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: i64,
    #[serde(default = "default_code_subject")]
    pub code_subject: String,
}

fn default_max_retries() -> i64 {
    DEFAULT_MAX_RETRIES
}

fn default_code_subject() -> String {
    "Your photoset validation code".to_string()
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            code_subject: default_code_subject(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default = "default_medium_size")]
    pub medium_size: u32,
    #[serde(default = "default_small_size")]
    pub small_size: u32,
    #[serde(default = "default_quality")]
    pub quality: u8,
    #[serde(default = "default_frame_delay")]
    pub animation_frame_delay_ms: u32,
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    /// Largest accepted upload request body.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_medium_size() -> u32 {
    DEFAULT_MEDIUM_SIZE
}

fn default_small_size() -> u32 {
    DEFAULT_SMALL_SIZE
}

fn default_quality() -> u8 {
    DEFAULT_JPEG_QUALITY
}

fn default_frame_delay() -> u32 {
    DEFAULT_FRAME_DELAY_MS
}

fn default_public_base_url() -> String {
    "/files".to_string()
}

fn default_max_upload_bytes() -> usize {
    DEFAULT_MAX_UPLOAD_BYTES
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            medium_size: default_medium_size(),
            small_size: default_small_size(),
            quality: default_quality(),
            animation_frame_delay_ms: default_frame_delay(),
            public_base_url: default_public_base_url(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_from")]
    pub from: String,
    #[serde(default = "default_mail_timeout")]
    pub timeout_seconds: u64,
}

fn default_from() -> String {
    "noreply@localhost".to_string()
}

fn default_mail_timeout() -> u64 {
    10
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            from: default_from(),
            timeout_seconds: default_mail_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegenerateConfig {
    #[serde(default = "default_regenerate_num_cpus")]
    pub num_cpus: usize,
}

fn default_regenerate_num_cpus() -> usize {
    num_cpus::get()
}

impl Default for RegenerateConfig {
    fn default() -> Self {
        Self {
            num_cpus: default_regenerate_num_cpus(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub images: ImageConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub regenerate: RegenerateConfig,
}

pub fn load_config(config_path: &Path) -> Config {
    if !config_path.exists() {
        return Config::default();
    }

    match fs::read_to_string(config_path) {
        Ok(content) => serde_yaml::from_str(&content).unwrap_or_default(),
        Err(_) => Config::default(),
    }
}

pub fn save_default_config(config_path: &Path) -> std::io::Result<()> {
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let config = Config::default();
    let yaml = serde_yaml::to_string(&config).map_err(|e| std::io::Error::other(e.to_string()))?;
    fs::write(config_path, yaml)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
security:
  trusted_networks:
    - "10.0.0.7"
    - "not-an-ip"
  trusted_proxies:
    - "::ffff:192.0.2.1"
validation:
  max_retries: 3
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.validation.max_retries, 3);
        assert_eq!(config.security.device_id_offset, DEFAULT_DEVICE_ID_OFFSET);
        assert_eq!(config.server.port, 8000);
        assert_eq!(
            config.security.trusted_addresses(),
            vec!["10.0.0.7".parse::<IpAddr>().unwrap()]
        );
        assert_eq!(
            config.security.trusted_proxy_addresses(),
            vec!["192.0.2.1".parse::<IpAddr>().unwrap()]
        );
    }

    #[test]
    fn test_missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.yaml"));
        assert_eq!(config.images.medium_size, DEFAULT_MEDIUM_SIZE);
        assert!(!config.mail.enabled);
    }
}
