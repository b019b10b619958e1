//! Request cache for agent replies and the bounded run-history directory.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};

use crate::{config::Config, llm::ChatMessage};

#[derive(Debug, Clone)]
pub struct RequestCache {
    length: usize,
    cache_path: PathBuf,
}

impl RequestCache {
    pub fn from_config(cfg: &Config) -> Self {
        let len = cfg.get_usize("CACHE_LENGTH").unwrap_or(100);
        Self::new(cfg.cache_path(), len)
    }

    pub fn new(path: impl Into<PathBuf>, length: usize) -> Self {
        let cache_path = path.into();
        let _ = fs::create_dir_all(&cache_path);
        Self { length, cache_path }
    }

    pub fn key_for(&self, base_url: &str, model: &str, temperature: f32, messages: &[ChatMessage]) -> String {
        let payload = serde_json::json!({
            "base_url": base_url,
            "model": model,
            "temperature": temperature,
            "messages": messages,
        });
        let data = serde_json::to_vec(&payload).unwrap_or_default();
        let digest = md5::compute(data);
        format!("{:x}", digest)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        fs::read_to_string(self.cache_path.join(key)).ok()
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        fs::write(self.cache_path.join(key), value)?;
        prune_oldest(&self.cache_path, self.length)
    }
}

/// Keep the newest `keep` files in `dir`, by modification time.
fn prune_oldest(dir: &Path, keep: usize) -> Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.filter_map(|e| e.ok()).collect();
    entries.sort_by_key(|e| e.metadata().and_then(|m| m.modified()).ok());
    if entries.len() > keep {
        let to_delete = entries.len() - keep;
        for entry in &entries[..to_delete] {
            let _ = fs::remove_file(entry.path());
        }
    }
    Ok(())
}

/// Copies of past execution logs, one `<run id>.json` per run.
#[derive(Debug, Clone)]
pub struct RunHistory {
    length: usize,
    storage_path: PathBuf,
}

impl RunHistory {
    pub fn from_config(cfg: &Config) -> Self {
        let len = cfg.get_usize("HISTORY_LENGTH").unwrap_or(20);
        Self::new(cfg.history_path(), len)
    }

    pub fn new(path: impl Into<PathBuf>, length: usize) -> Self {
        Self { length, storage_path: path.into() }
    }

    fn file_path(&self, run_id: &str) -> PathBuf {
        self.storage_path.join(format!("{run_id}.json"))
    }

    pub fn save(&self, run_id: &str, log: &serde_json::Value) -> Result<PathBuf> {
        fs::create_dir_all(&self.storage_path)
            .with_context(|| format!("creating {}", self.storage_path.display()))?;
        let p = self.file_path(run_id);
        fs::write(&p, serde_json::to_string_pretty(log)?)?;
        prune_oldest(&self.storage_path, self.length)?;
        Ok(p)
    }

    pub fn read(&self, run_id: &str) -> Result<serde_json::Value> {
        let p = self.file_path(run_id);
        if !p.exists() {
            bail!("run not found: {}", p.display());
        }
        let text = fs::read_to_string(&p)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Run ids, oldest first.
    pub fn list(&self) -> Vec<String> {
        let Ok(read_dir) = fs::read_dir(&self.storage_path) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = read_dir
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|x| x == "json"))
            .collect();
        files.sort_by_key(|p| fs::metadata(p).and_then(|m| m.modified()).ok());
        files
            .iter()
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect()
    }
}
