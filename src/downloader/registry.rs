//! Type tag to builder mapping.

use std::collections::HashMap;
use std::sync::Arc;

use super::{ConfigRecord, DownloaderClient, DownloaderType};
use crate::error::{DownloaderError, Error, Result};

/// Constructs a client from a stored config record
pub type Builder = Arc<dyn Fn(&ConfigRecord) -> Result<Arc<dyn DownloaderClient>> + Send + Sync>;

/// Explicitly constructed builder registry, handed to the [`Manager`](super::Manager)
#[derive(Clone, Default)]
pub struct Registry {
    builders: HashMap<String, Builder>,
}

impl Registry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in adapter registered
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        super::qbittorrent::register(&mut registry);
        registry
    }

    /// Register (or replace) the builder for a type tag
    pub fn register<F>(&mut self, kind: impl Into<String>, builder: F)
    where
        F: Fn(&ConfigRecord) -> Result<Arc<dyn DownloaderClient>> + Send + Sync + 'static,
    {
        self.builders.insert(kind.into(), Arc::new(builder));
    }

    /// Register under a built-in type tag
    pub fn register_type<F>(&mut self, kind: DownloaderType, builder: F)
    where
        F: Fn(&ConfigRecord) -> Result<Arc<dyn DownloaderClient>> + Send + Sync + 'static,
    {
        self.register(kind.as_str(), builder);
    }

    /// Whether a builder exists for this type tag
    pub fn contains(&self, kind: &str) -> bool {
        self.builders.contains_key(kind)
    }

    /// Build a client for a record
    ///
    /// Unknown type tags are a permanent failure.
    pub fn build(&self, record: &ConfigRecord) -> Result<Arc<dyn DownloaderClient>> {
        let builder = self.builders.get(&record.kind).ok_or_else(|| {
            Error::permanent(DownloaderError::UnknownType(record.kind.clone()))
        })?;
        builder(record)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.builders.keys().collect();
        kinds.sort();
        f.debug_struct("Registry").field("types", &kinds).finish()
    }
}
