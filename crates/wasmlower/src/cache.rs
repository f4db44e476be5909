//! Storage for generated source, keyed by module name.
//!
//! The orchestrator ([`crate::compile_file_cached`]) consults
//! [`Cache::timestamp`] to decide whether a module must be recompiled and
//! [`Cache::load`] to hand back the artifact.

use anyhow::{Context, Result};
use log::debug;
use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub trait Cache {
    /// The cached source for `key`, if present.
    fn load(&self, key: &str) -> Result<Option<String>>;

    fn write(&mut self, key: &str, source: &str) -> Result<()>;

    /// When `key` was last written, if present.
    fn timestamp(&self, key: &str) -> Option<SystemTime>;
}

/// In-process cache. Entries live as long as the value.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: HashMap<String, (String, SystemTime)>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Cache for MemoryCache {
    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|(source, _)| source.clone()))
    }

    fn write(&mut self, key: &str, source: &str) -> Result<()> {
        self.entries
            .insert(key.to_string(), (source.to_string(), SystemTime::now()));
        Ok(())
    }

    fn timestamp(&self, key: &str) -> Option<SystemTime> {
        self.entries.get(key).map(|(_, time)| *time)
    }
}

/// One `WasmModule_<key>.rs` file per module in a directory, created on
/// first write. Files are replaced atomically, so a concurrent reader sees
/// either the old or the new artifact.
#[derive(Debug, Clone)]
pub struct FilesystemCache {
    directory: PathBuf,
}

impl FilesystemCache {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn location(&self, key: &str) -> PathBuf {
        self.directory.join(format!("WasmModule_{key}.rs"))
    }
}

impl Cache for FilesystemCache {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let location = self.location(key);
        match fs::read_to_string(&location) {
            Ok(source) => Ok(Some(source)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => {
                Err(err).with_context(|| format!("failed to read {}", location.display()))
            }
        }
    }

    fn write(&mut self, key: &str, source: &str) -> Result<()> {
        let location = self.location(key);
        fs::create_dir_all(&self.directory).with_context(|| {
            format!(
                "unable to create the cache directory {}",
                self.directory.display()
            )
        })?;

        let mut tmp = tempfile::Builder::new()
            .prefix(&format!("WasmModule_{key}"))
            .tempfile_in(&self.directory)
            .with_context(|| {
                format!(
                    "unable to write in the cache directory {}",
                    self.directory.display()
                )
            })?;
        tmp.write_all(source.as_bytes())
            .with_context(|| format!("failed to write cache entry `{key}`"))?;
        tmp.persist(&location)
            .with_context(|| format!("failed to write cache file {}", location.display()))?;
        debug!("cache: wrote {}", location.display());
        Ok(())
    }

    fn timestamp(&self, key: &str) -> Option<SystemTime> {
        fs::metadata(self.location(key))
            .and_then(|meta| meta.modified())
            .ok()
    }
}
