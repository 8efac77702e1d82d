use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::{
    BlobStore, ByteHandlerPipeline, ChaChaEncryptor, DirectoryObjectClient, DualStore, FileStore,
    MemoryStore, ObjectStore, SnappyCompressor,
};
use crate::commit::CommitMode;
use crate::revisioning::Revisioning;
use crate::types::{Result, StratumError};

/// Name of the configuration file recorded next to a persistent resource.
pub const CONFIG_FILE: &str = "resource.toml";

/// Where a resource keeps its pages.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Volatile in-process store.
    #[default]
    Memory,
    /// Append-only data file in `path`.
    File {
        /// Resource directory.
        path: PathBuf,
    },
    /// One object per page, through a directory-backed object client.
    Object {
        /// Object root directory.
        root: PathBuf,
    },
    /// Writes go to both; the secondary is mirrored in the background.
    Dual {
        /// Authoritative store.
        primary: Box<BackendConfig>,
        /// Mirror.
        secondary: Box<BackendConfig>,
    },
}

impl BackendConfig {
    /// Directory holding the resource configuration, if the backend persists.
    pub fn location(&self) -> Option<&Path> {
        match self {
            BackendConfig::Memory => None,
            BackendConfig::File { path } => Some(path),
            BackendConfig::Object { root } => Some(root),
            BackendConfig::Dual { primary, .. } => primary.location(),
        }
    }

    fn open(&self, timeout: Duration) -> Result<Arc<dyn BlobStore>> {
        Ok(match self {
            BackendConfig::Memory => Arc::new(MemoryStore::new()),
            BackendConfig::File { path } => Arc::new(FileStore::open(path)?),
            BackendConfig::Object { root } => {
                Arc::new(ObjectStore::new(DirectoryObjectClient::new(root)?))
            }
            BackendConfig::Dual { primary, secondary } => Arc::new(DualStore::new(
                primary.open(timeout)?,
                secondary.open(timeout)?,
                timeout,
            )?),
        })
    }
}

/// One stage of the byte pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HandlerConfig {
    /// Snappy compression.
    Snappy,
    /// ChaCha20 encryption with a hex-encoded 256-bit key.
    Chacha20 {
        /// 64 hex characters.
        key_hex: String,
    },
}

/// Settings fixed for the lifetime of a resource.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// How node page versions are stored.
    pub revisioning: Revisioning,
    /// Physical versions a strategy may consult.
    pub window: usize,
    /// Commit execution.
    pub commit: CommitMode,
    /// Read cache capacity in pages.
    pub cache_pages: usize,
    /// Read cache lock shards.
    pub cache_shards: usize,
    /// Bound on waits during commit publication and close.
    pub close_timeout_ms: u64,
    // TOML requires table-valued fields after plain values.
    /// Page store.
    pub backend: BackendConfig,
    /// Byte handlers applied in order on write.
    pub pipeline: Vec<HandlerConfig>,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            revisioning: Revisioning::Incremental,
            window: 4,
            commit: CommitMode::Blocking,
            cache_pages: 1024,
            cache_shards: 8,
            close_timeout_ms: 30_000,
            backend: BackendConfig::Memory,
            pipeline: Vec::new(),
        }
    }
}

impl ResourceConfig {
    /// Default settings over a file store in `dir`.
    pub fn file(dir: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendConfig::File { path: dir.into() },
            ..Self::default()
        }
    }

    /// Replaces the revisioning strategy and window.
    pub fn with_revisioning(mut self, revisioning: Revisioning, window: usize) -> Self {
        self.revisioning = revisioning;
        self.window = window;
        self
    }

    /// Replaces the commit mode.
    pub fn with_commit(mut self, commit: CommitMode) -> Self {
        self.commit = commit;
        self
    }

    /// Appends a pipeline stage.
    pub fn with_handler(mut self, handler: HandlerConfig) -> Self {
        self.pipeline.push(handler);
        self
    }

    /// Bound on waits during publication and close.
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// Rejects settings no resource can run with.
    pub fn validate(&self) -> Result<()> {
        if self.window == 0 {
            return Err(StratumError::Config("window must be at least 1".into()));
        }
        if self.cache_pages == 0 {
            return Err(StratumError::Config("cache_pages must be at least 1".into()));
        }
        if self.close_timeout_ms == 0 {
            return Err(StratumError::Config(
                "close_timeout_ms must be positive".into(),
            ));
        }
        self.build_pipeline().map(|_| ())
    }

    /// Instantiates the byte handler pipeline.
    pub fn build_pipeline(&self) -> Result<ByteHandlerPipeline> {
        let mut pipeline = ByteHandlerPipeline::new();
        for handler in &self.pipeline {
            match handler {
                HandlerConfig::Snappy => pipeline.push(Box::new(SnappyCompressor)),
                HandlerConfig::Chacha20 { key_hex } => {
                    pipeline.push(Box::new(ChaChaEncryptor::from_hex(key_hex)?))
                }
            }
        }
        Ok(pipeline)
    }

    /// Opens the configured page store.
    pub fn open_store(&self) -> Result<Arc<dyn BlobStore>> {
        self.backend.open(self.close_timeout())
    }

    /// Reads the configuration recorded in `dir`.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let path = dir.as_ref().join(CONFIG_FILE);
        let contents = fs::read_to_string(&path).map_err(|err| {
            StratumError::Config(format!("failed to read {}: {err}", path.display()))
        })?;
        let config: Self = toml::from_str(&contents).map_err(|err| {
            StratumError::Config(format!("failed to parse {}: {err}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Records this configuration in `dir`.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(CONFIG_FILE);
        let serialized = toml::to_string_pretty(self)
            .map_err(|err| StratumError::Config(format!("failed to serialize config: {err}")))?;
        fs::write(&path, serialized)?;
        Ok(path)
    }
}
