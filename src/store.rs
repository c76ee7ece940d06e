use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

pub const MIN_DPI: u32 = 100;
pub const MAX_DPI: u32 = 1000;

pub type UserId = u64;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no preamble stored for user {0}")]
    NotFound(UserId),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub trait PreambleStore: Send + Sync {
    fn get_preamble(&self, user: UserId) -> Result<String, StoreError>;

    fn get_default_preamble(&self) -> String;
}

pub trait DpiStore: Send + Sync {
    fn get_dpi(&self, user: UserId) -> u32;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    preambles: BTreeMap<String, String>,
    #[serde(default)]
    dpi: BTreeMap<String, u32>,
}

#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    default_preamble: String,
    default_dpi: u32,
    lock: Mutex<()>,
}

impl JsonStore {
    pub fn open(path: &Path, default_preamble: String, default_dpi: u32) -> Result<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create store dir: {}", dir.display()))?;
            }
        }
        let store = Self {
            path: path.to_path_buf(),
            default_preamble,
            default_dpi,
            lock: Mutex::new(()),
        };
        if !path.exists() {
            store.write(&StoreFile::default())?;
        }
        Ok(store)
    }

    pub fn put_preamble(&self, user: UserId, preamble: &str) -> Result<()> {
        self.update(|file| {
            file.preambles.insert(user.to_string(), preamble.to_string());
            Ok(())
        })
    }

    pub fn set_dpi(&self, user: UserId, dpi: u32) -> Result<()> {
        if !(MIN_DPI..=MAX_DPI).contains(&dpi) {
            return Err(anyhow!(
                "dpi must be between {} and {} (got {})",
                MIN_DPI,
                MAX_DPI,
                dpi
            ));
        }
        self.update(|file| {
            file.dpi.insert(user.to_string(), dpi);
            Ok(())
        })
    }

    fn update<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut StoreFile) -> Result<()>,
    {
        let _guard = self.lock.lock().map_err(|_| anyhow!("store lock poisoned"))?;
        let mut file = self.read()?;
        apply(&mut file)?;
        self.write(&file)
    }

    fn snapshot(&self) -> Result<StoreFile> {
        let _guard = self.lock.lock().map_err(|_| anyhow!("store lock poisoned"))?;
        self.read()
    }

    fn read(&self) -> Result<StoreFile> {
        if !self.path.exists() {
            return Ok(StoreFile::default());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read store: {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse store: {}", self.path.display()))
    }

    fn write(&self, file: &StoreFile) -> Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let content = serde_json::to_string_pretty(file)?;
        let mut temp = tempfile::NamedTempFile::new_in(&dir)
            .with_context(|| "failed to create temp store file")?;
        temp.write_all(content.as_bytes())
            .with_context(|| "failed to write temp store file")?;
        temp.persist(&self.path)
            .map_err(|err| anyhow!("failed to persist store {}: {}", self.path.display(), err))?;
        Ok(())
    }
}

impl PreambleStore for JsonStore {
    fn get_preamble(&self, user: UserId) -> Result<String, StoreError> {
        let file = self.snapshot()?;
        file.preambles
            .get(&user.to_string())
            .cloned()
            .ok_or(StoreError::NotFound(user))
    }

    fn get_default_preamble(&self) -> String {
        self.default_preamble.clone()
    }
}

impl DpiStore for JsonStore {
    fn get_dpi(&self, user: UserId) -> u32 {
        match self.snapshot() {
            Ok(file) => match file.dpi.get(&user.to_string()).copied() {
                Some(dpi) if (MIN_DPI..=MAX_DPI).contains(&dpi) => dpi,
                Some(dpi) => {
                    tracing::warn!("ignoring out-of-range dpi {} for user {}", dpi, user);
                    self.default_dpi
                }
                None => self.default_dpi,
            },
            Err(err) => {
                tracing::warn!("failed to read dpi for user {}: {:#}", user, err);
                self.default_dpi
            }
        }
    }
}
