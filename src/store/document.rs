use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::StoreError;

use super::StoreResult;

/// A serde document kept in memory and mirrored to a JSON file.
/// Without a path it lives only in memory.
pub struct JsonDocument<T> {
    path: Option<PathBuf>,
    data: Mutex<T>,
}

impl<T> JsonDocument<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn open(path: PathBuf) -> StoreResult<Self> {
        let data = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            T::default()
        };
        Ok(Self {
            path: Some(path),
            data: Mutex::new(data),
        })
    }

    /// Loads `path` like `open` but never writes back to it.
    pub fn detached(path: PathBuf) -> StoreResult<Self> {
        let mut doc = Self::open(path)?;
        doc.path = None;
        Ok(doc)
    }

    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: Mutex::new(T::default()),
        }
    }

    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> StoreResult<R> {
        let guard = self.lock()?;
        Ok(f(&guard))
    }

    /// Applies `f` and persists when it reports a change. If `f` or the save
    /// fails the in-memory copy is rolled back so memory and disk agree.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> StoreResult<(R, bool)>) -> StoreResult<R>
    where
        T: Clone,
    {
        let mut guard = self.lock()?;
        let before = guard.clone();
        let (result, changed) = match f(&mut guard) {
            Ok(r) => r,
            Err(e) => {
                *guard = before;
                return Err(e);
            }
        };
        if changed {
            if let Err(e) = self.save(&guard) {
                *guard = before;
                return Err(e);
            }
        }
        Ok(result)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, T>> {
        self.data.lock().map_err(|_| StoreError::Poisoned)
    }

    fn save(&self, data: &T) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(data)?;
        let tmp = tmp_path(path);
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
