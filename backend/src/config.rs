use batik_shared::BatikClass;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use url::Url;

use crate::classifier::DEFAULT_INPUT_SIZE;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_BASE_URL: &str = "https://api-production-eac6.up.railway.app/";
pub const DEFAULT_MODEL_PATH: &str = "mobilenetv2_batik.pt";
pub const DEFAULT_UPLOAD_DIR: &str = "uploaded_images";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value {0:?}")]
    InvalidPort(String),
    #[error("Invalid BASE_URL {value:?}: {source}")]
    InvalidBaseUrl {
        value: String,
        source: url::ParseError,
    },
    #[error("BASE_URL {0:?} cannot carry a path")]
    CannotBeABase(String),
    #[error("Failed to read classifier config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse classifier config {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("Invalid classifier config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub base_url: Url,
    pub model_path: PathBuf,
    pub upload_dir: PathBuf,
    pub classifier: ClassifierConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let port = match get("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort(raw.clone()))?,
            None => DEFAULT_PORT,
        };

        let base_url = parse_base_url(&get("BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.into()))?;

        let classifier = match get("CLASSIFIER_CONFIG") {
            Some(path) => ClassifierConfig::load(Path::new(&path))?,
            None => ClassifierConfig::default(),
        };

        Ok(Self {
            port,
            base_url,
            model_path: get("MODEL_PATH")
                .unwrap_or_else(|| DEFAULT_MODEL_PATH.into())
                .into(),
            upload_dir: get("UPLOAD_DIR")
                .unwrap_or_else(|| DEFAULT_UPLOAD_DIR.into())
                .into(),
            classifier,
        })
    }
}

/// Parses `raw` and makes sure its path ends in `/` so relative joins land
/// beneath it rather than replacing its last segment.
pub fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidBaseUrl {
        value: raw.to_string(),
        source,
    })?;
    if url.cannot_be_a_base() {
        return Err(ConfigError::CannotBeABase(raw.to_string()));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Public URL of a stored image: `<base>/images/<filename>`.
pub fn image_url(base_url: &Url, filename: &str) -> Result<Url, url::ParseError> {
    base_url.join(&format!("images/{}", urlencoding::encode(filename)))
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub class_names: Vec<String>,
    pub image: ImageConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub size: Vec<u32>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            class_names: BatikClass::names(),
            image: ImageConfig::default(),
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        let (width, height) = DEFAULT_INPUT_SIZE;
        Self {
            size: vec![width, height],
        }
    }
}

impl ClassifierConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: ClassifierConfig =
            serde_yaml::from_str(&config_str).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.class_names.is_empty() {
            return Err(ConfigError::Invalid("class_names must not be empty".into()));
        }
        if let Some(blank) = self.class_names.iter().position(|name| name.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("class_names[{}] is blank", blank)));
        }
        match self.image.size.as_slice() {
            [width, height] if *width > 0 && *height > 0 => Ok(()),
            other => Err(ConfigError::Invalid(format!(
                "image.size must be [width, height] with non-zero values, got {:?}",
                other
            ))),
        }
    }

    pub fn input_size(&self) -> (u32, u32) {
        match self.image.size.as_slice() {
            [width, height] => (*width, *height),
            _ => DEFAULT_INPUT_SIZE,
        }
    }
}
