//! Configuration loading and validation.
//!
//! Values are layered with [`figment`]: built-in defaults first, then an
//! optional configuration file (TOML, YAML or JSON, chosen by extension),
//! then `YOMU_`-prefixed environment variables. Nested keys use a double
//! underscore in the environment, so `YOMU_CATALOG__PAGE_SIZE=50` overrides
//! `catalog.page_size`.

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const ENV_PREFIX: &str = "YOMU_";
const FILE_NAMES: [&str; 4] = ["config.toml", "config.yaml", "config.yml", "config.json"];

pub const DEFAULT_BASE_URL: &str = "https://api.mangadex.org";
pub const DEFAULT_AUTH_URL: &str = "https://auth.mangadex.org/realms/mangadex/protocol/openid-connect/token";
pub const DEFAULT_UPLOADS_URL: &str = "https://uploads.mangadex.org";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub catalog: CatalogConfig,
    pub reader: ReaderConfig,
    pub library: LibraryConfig,
    /// Directory for persisted session and reading state. Defaults to the
    /// platform's local data directory.
    pub state_dir: Option<PathBuf>,
}

/// Remote service location and HTTP behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// OAuth token endpoint used for both password and refresh grants.
    pub auth_url: String,
    /// Host serving cover images.
    pub uploads_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    /// Translation language requested for catalog and chapter listings.
    pub language: String,
}
impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            uploads_url: DEFAULT_UPLOADS_URL.to_string(),
            user_agent: concat!("yomu/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_secs: 30,
            language: "en".to_string(),
        }
    }
}
impl ApiConfig {
    pub fn base_url(&self) -> Result<Url> {
        parse_url("api.base_url", &self.base_url)
    }

    pub fn auth_url(&self) -> Result<Url> {
        parse_url("api.auth_url", &self.auth_url)
    }

    pub fn uploads_url(&self) -> Result<Url> {
        parse_url("api.uploads_url", &self.uploads_url)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Number of entries (and chapters) requested per page.
    pub page_size: u32,
    /// Quiet period after the last search keystroke before reloading.
    pub search_debounce_ms: u64,
}
impl Default for CatalogConfig {
    fn default() -> Self {
        Self { page_size: 20, search_debounce_ms: 500 }
    }
}
impl CatalogConfig {
    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }
}

/// Which of the two image renditions the reader should request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PageQuality {
    Full,
    #[default]
    DataSaver,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Pages decoded ahead of the current page.
    pub prefetch_buffer: usize,
    pub quality: PageQuality,
}
impl Default for ReaderConfig {
    fn default() -> Self {
        Self { prefetch_buffer: 2, quality: PageQuality::DataSaver }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Maximum concurrent entry-detail fetches during a library sync.
    pub concurrency: usize,
}
impl Default for LibraryConfig {
    fn default() -> Self {
        Self { concurrency: 8 }
    }
}

impl Config {
    /// Load configuration from the first configuration file found in the
    /// platform configuration directory (if any), then the environment.
    pub fn load() -> Result<Self> {
        let dirs = project_dirs()?;
        let file = FILE_NAMES.iter().map(|name| dirs.config_dir().join(name)).find(|path| path.is_file());
        match &file {
            Some(path) => tracing::debug!(path = %path.display(), "Loading configuration file"),
            None => tracing::debug!("No configuration file found; using defaults and environment"),
        }
        Self::extract(Self::figment(file.as_deref()))
    }

    /// Load configuration from an explicit file, then the environment.
    ///
    /// Unlike [`load()`](Self::load) a missing file is an error.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        Self::extract(Self::figment(Some(path)))
    }

    fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = file {
            figment = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                _ => figment.merge(Toml::file(path)),
            };
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract().or_raise(|| ErrorKind::Extract)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values that deserialization alone can't.
    pub fn validate(&self) -> Result<()> {
        self.api.base_url()?;
        self.api.auth_url()?;
        self.api.uploads_url()?;
        if self.catalog.page_size == 0 {
            exn::bail!(invalid("catalog.page_size", "must be at least 1"));
        }
        if self.library.concurrency == 0 {
            exn::bail!(invalid("library.concurrency", "must be at least 1"));
        }
        if self.api.language.trim().is_empty() {
            exn::bail!(invalid("api.language", "must not be empty"));
        }
        Ok(())
    }

    /// Directory holding persisted state.
    pub fn state_dir(&self) -> Result<PathBuf> {
        match &self.state_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(project_dirs()?.data_local_dir().to_path_buf()),
        }
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("org", "yomu", "yomu").ok_or_else(|| exn::Exn::from(ErrorKind::NoProjectDirs))
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ErrorKind {
    ErrorKind::Invalid { key, reason: reason.into() }
}

fn parse_url(key: &'static str, value: &str) -> Result<Url> {
    let url = Url::parse(value).or_raise(|| invalid(key, format!("not a URL: {value}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        exn::bail!(invalid(key, format!("unsupported scheme: {}", url.scheme())));
    }
    Ok(url)
}
