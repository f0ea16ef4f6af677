use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Free-form settings table backing the resolution chain
    /// (request override > this table > environment > hardcoded default).
    #[serde(default)]
    pub settings: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub data_root: PathBuf,
}

impl StorageConfig {
    pub fn status_dir(&self) -> PathBuf {
        self.data_root.join("status")
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.data_root.join("downloads")
    }

    pub fn archives_dir(&self) -> PathBuf {
        self.data_root.join("archives")
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthConfig {
    /// Empty list disables the X-API-Key check.
    #[serde(default)]
    pub api_keys: Vec<String>,
}

impl Config {
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let config_path = path.unwrap_or("/etc/dl-runner/config.yaml");
        let settings = config::Config::builder()
            .add_source(config::File::with_name(config_path))
            .add_source(config::Environment::with_prefix("DLR"))
            .build()?;

        settings.try_deserialize()
    }
}

/// Lookup for tool paths, credentials, and tuning knobs that may come from
/// the config file or the environment and may be overridden per request.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    stored: HashMap<String, String>,
}

impl Settings {
    pub fn new(stored: HashMap<String, String>) -> Self {
        Self { stored }
    }

    /// Stored value, else `DLR_<KEY>` from the environment.
    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.stored.get(key) {
            return Some(value.clone());
        }
        std::env::var(format!("DLR_{}", key.to_uppercase())).ok()
    }

    /// Full precedence chain: request override > stored > environment > default.
    pub fn resolve(&self, override_value: Option<&str>, key: &str) -> Option<String> {
        if let Some(value) = override_value {
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
        self.get(key)
    }

    pub fn resolve_or(&self, override_value: Option<&str>, key: &str, default: &str) -> String {
        self.resolve(override_value, key)
            .unwrap_or_else(|| default.to_string())
    }

    /// Binary path for an external tool, defaulting to the bare name so the
    /// PATH lookup applies.
    pub fn tool(&self, key: &str, default: &str) -> String {
        self.resolve_or(None, key, default)
    }
}

/// Canonical path layout under the data root. Shared by the store and the
/// pipeline so file naming stays in one place.
#[derive(Debug, Clone)]
pub struct TaskPaths {
    status_dir: PathBuf,
    downloads_dir: PathBuf,
    archives_dir: PathBuf,
}

impl TaskPaths {
    pub fn new(storage: &StorageConfig) -> Self {
        Self {
            status_dir: storage.status_dir(),
            downloads_dir: storage.downloads_dir(),
            archives_dir: storage.archives_dir(),
        }
    }

    pub fn from_dirs(status_dir: PathBuf, downloads_dir: PathBuf, archives_dir: PathBuf) -> Self {
        Self {
            status_dir,
            downloads_dir,
            archives_dir,
        }
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.status_dir)?;
        std::fs::create_dir_all(&self.downloads_dir)?;
        std::fs::create_dir_all(&self.archives_dir)?;
        Ok(())
    }

    pub fn status_dir(&self) -> &Path {
        &self.status_dir
    }

    pub fn archives_dir(&self) -> &Path {
        &self.archives_dir
    }

    pub fn status_file(&self, id: uuid::Uuid) -> PathBuf {
        self.status_dir.join(format!("{id}.json"))
    }

    pub fn download_log(&self, id: uuid::Uuid) -> PathBuf {
        self.status_dir.join(format!("{id}.log"))
    }

    pub fn upload_log(&self, id: uuid::Uuid) -> PathBuf {
        self.status_dir.join(format!("{id}_upload.log"))
    }

    pub fn oauth_log(&self, id: uuid::Uuid) -> PathBuf {
        self.status_dir.join(format!("oauth_{id}.log"))
    }

    pub fn download_dir(&self, id: uuid::Uuid) -> PathBuf {
        self.downloads_dir.join(id.to_string())
    }

    pub fn archive_file(&self, id: uuid::Uuid, chunk: Option<usize>) -> PathBuf {
        match chunk {
            Some(n) => self.archives_dir.join(format!("archive_{id}_{n}.tar.zst")),
            None => self.archives_dir.join(format!("archive_{id}.tar.zst")),
        }
    }

    pub fn chunk_list_file(&self, id: uuid::Uuid, chunk: usize) -> PathBuf {
        self.archives_dir.join(format!("{id}_chunk_{chunk}.txt"))
    }
}
