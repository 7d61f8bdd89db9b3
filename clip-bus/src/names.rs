//! User-assigned journey names, keyed by the journey's first clip path.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::NameStoreError;

pub const SIDECAR_FILE_NAME: &str = "journeys.json";

pub trait JourneyNames: Send + Sync {
    fn get(&self, clip: &Path) -> Option<String>;
    fn set(&self, clip: &Path, name: &str) -> Result<(), NameStoreError>;
}

fn key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[derive(Default)]
pub struct MemoryJourneyNames {
    names: RwLock<BTreeMap<String, String>>,
}

impl JourneyNames for MemoryJourneyNames {
    fn get(&self, clip: &Path) -> Option<String> {
        self.names.read().ok()?.get(&key(clip)).cloned()
    }

    fn set(&self, clip: &Path, name: &str) -> Result<(), NameStoreError> {
        self.names
            .write()
            .map_err(|_| NameStoreError::Poisoned)?
            .insert(key(clip), name.to_string());
        Ok(())
    }
}

/// Names persisted in a JSON sidecar, rewritten in full on every change.
pub struct JsonJourneyNames {
    file: PathBuf,
    names: RwLock<BTreeMap<String, String>>,
}

impl JsonJourneyNames {
    /// Opens the sidecar in `folder`; a missing file is an empty store.
    pub fn open(folder: &Path) -> Result<Self, NameStoreError> {
        let file = folder.join(SIDECAR_FILE_NAME);
        let names = match std::fs::read(&file) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            file,
            names: RwLock::new(names),
        })
    }

    fn persist(&self, names: &BTreeMap<String, String>) -> Result<(), NameStoreError> {
        let tmp = self.file.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(names)?)?;
        std::fs::rename(&tmp, &self.file)?;
        Ok(())
    }
}

impl JourneyNames for JsonJourneyNames {
    fn get(&self, clip: &Path) -> Option<String> {
        self.names.read().ok()?.get(&key(clip)).cloned()
    }

    fn set(&self, clip: &Path, name: &str) -> Result<(), NameStoreError> {
        let mut names = self.names.write().map_err(|_| NameStoreError::Poisoned)?;
        let previous = names.insert(key(clip), name.to_string());
        if let Err(e) = self.persist(&names) {
            match previous {
                Some(p) => names.insert(key(clip), p),
                None => names.remove(&key(clip)),
            };
            return Err(e);
        }
        Ok(())
    }
}
