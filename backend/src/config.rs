use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
    #[error("Invalid OpenAI base URL: {0}")]
    BaseUrl(#[from] url::ParseError),
    #[error("Invalid throttle rate '{0}', expected <count>/<period>")]
    InvalidRate(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub openai: OpenAiConfig,
    pub upload: UploadConfig,
    pub throttle: ThrottleConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_upload_size: usize,
    pub allowed_content_types: Vec<String>,
    pub max_images: usize,
    /// Widest or tallest image the decoder will accept, in pixels.
    pub max_image_dimension: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// `None` turns throttling off.
    pub anon_rate: Option<String>,
    /// Key clients by `Forwarded`/`X-Forwarded-For` instead of the peer
    /// address. Only safe behind a proxy that overwrites those headers.
    pub trust_forwarded: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
        }
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_secs: 600,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_upload_size: 10 * 1024 * 1024,
            allowed_content_types: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/bmp".to_string(),
            ],
            max_images: 3,
            max_image_dimension: 12_000,
        }
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            anon_rate: Some("100/hour".to_string()),
            trust_forwarded: false,
        }
    }
}

impl OpenAiConfig {
    /// The key, if one is set and non-blank.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn completions_url(&self) -> Result<Url, ConfigError> {
        let mut base = self.base_url.trim_end_matches('/').to_string();
        base.push('/');
        Ok(Url::parse(&base)?.join("chat/completions")?)
    }
}

impl Settings {
    /// Loads the YAML file named by `APP_CONFIG` (or `config/settings.yaml`),
    /// then applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("APP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_config_path());

        let mut settings = if path.exists() {
            log::info!("Loading settings from {}", path.display());
            Self::from_file(&path)?
        } else {
            log::warn!(
                "No config file at {}, using built-in defaults",
                path.display()
            );
            Self::default()
        };

        settings.apply_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.openai.api_key = Some(key);
        }
        if let Some(model) = lookup("OPENAI_MODEL") {
            self.openai.model = model;
        }
        if let Some(base_url) = lookup("OPENAI_BASE_URL") {
            self.openai.base_url = base_url;
        }
        if let Some(value) = lookup("OPENAI_TIMEOUT_SECS") {
            self.openai.timeout_secs = parse_number("OPENAI_TIMEOUT_SECS", value)?;
        }
        if let Some(value) = lookup("MAX_UPLOAD_SIZE") {
            self.upload.max_upload_size = parse_number("MAX_UPLOAD_SIZE", value)?;
        }
        if let Some(value) = lookup("MAX_IMAGES") {
            self.upload.max_images = parse_number("MAX_IMAGES", value)?;
        }
        if let Some(rate) = lookup("ANON_THROTTLE_RATE") {
            self.throttle.anon_rate = match rate.trim() {
                "" | "none" | "off" => None,
                other => Some(other.to_string()),
            };
        }
        if let Some(value) = lookup("THROTTLE_TRUST_FORWARDED") {
            self.throttle.trust_forwarded = parse_number("THROTTLE_TRUST_FORWARDED", value)?;
        }
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(value) = lookup("PORT") {
            self.server.port = parse_number("PORT", value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.openai.completions_url()?;
        if let Some(rate) = &self.throttle.anon_rate {
            crate::throttle::Rate::parse(rate)?;
        }
        if self.upload.max_images == 0 {
            return Err(ConfigError::InvalidValue {
                key: "upload.max_images",
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn default_config_path() -> PathBuf {
    match std::env::var("CARGO_MANIFEST_DIR") {
        Ok(manifest_dir) => PathBuf::from(format!("{}/../config/settings.yaml", manifest_dir)),
        Err(_) => PathBuf::from("config/settings.yaml"),
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}
