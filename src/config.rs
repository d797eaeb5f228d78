use anyhow::Context;
use serde::Deserialize;
use std::{
    env, fmt, fs,
    path::Path,
};

pub const DEFAULT_CONFIG_PATH: &str = "randquote.toml";
pub const DEFAULT_BASE_URL: &str = "https://api.api-ninjas.com/v1/quotes";
pub const DEFAULT_KEY_VAR: &str = "KEY";
pub const DEFAULT_CATEGORY: &str = "happiness";

#[derive(Deserialize, Default)]
pub struct QuoteConfig {
    pub log_level: Option<String>,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub quote: QuoteOptions,
}

#[derive(Deserialize, Default)]
pub struct ApiConfig {
    pub base_url: Option<String>,
    pub key_var: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct QuoteOptions {
    pub category: Option<String>,
    pub with_author: Option<bool>,
}

impl QuoteConfig {
    /// Reads the config from `explicit`, or from `randquote.toml` in the
    /// working directory if that exists. Without either, all defaults apply.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        Self::load_or(explicit, Path::new(DEFAULT_CONFIG_PATH))
    }

    fn load_or(explicit: Option<&Path>, fallback: &Path) -> anyhow::Result<Self> {
        let path = match explicit {
            Some(path) => path,
            None if fallback.exists() => fallback,
            None => return Ok(Self::default()),
        };
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = toml::from_str(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    pub fn base_url(&self) -> &str {
        self.api.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn key_var(&self) -> &str {
        self.api.key_var.as_deref().unwrap_or(DEFAULT_KEY_VAR)
    }

    /// The command line wins over the config file.
    pub fn category<'a>(&'a self, cli: Option<&'a str>) -> &'a str {
        cli.or(self.quote.category.as_deref())
            .unwrap_or(DEFAULT_CATEGORY)
    }

    pub fn with_author(&self, cli: bool) -> bool {
        cli || self.quote.with_author.unwrap_or(false)
    }
}

/// Seeds the process environment from a dotenv file. A missing file is
/// fine; variables that are already set keep their value.
pub fn load_dotenv(path: &Path) -> anyhow::Result<()> {
    match dotenv::from_path(path) {
        Ok(()) => tracing::debug!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => tracing::debug!("No {} file found", path.display()),
        Err(e) => return Err(e).with_context(|| format!("Failed to load {}", path.display())),
    }
    Ok(())
}

/// API key sent as `X-Api-Key`.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// An unset variable gives an empty key; the API decides what to do with it.
    pub fn from_env(var: &str) -> Self {
        match env::var(var) {
            Ok(key) => Self::new(key),
            Err(e) => {
                tracing::debug!("Could not read API key from ${}: {}", var, e);
                Self::default()
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}
