use std::{
    collections::HashMap,
    env,
    fs,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    time::Duration,
};

use directories::BaseDirs;

#[derive(Debug, Clone)]
pub struct Config {
    inner: HashMap<String, String>,
    pub config_path: PathBuf,
}

impl Config {
    pub fn load() -> Self {
        let config_path = default_config_path();
        let mut cfg = Self::from_map(default_map(), config_path.clone());

        // Read .edagentrc if exists
        if config_path.exists() {
            cfg.merge_file(&config_path);
        }

        // Overlay environment variables (take precedence)
        for (k, v) in env::vars() {
            if is_config_key(&k) {
                cfg.inner.insert(k, v);
            }
        }

        cfg
    }

    /// Defaults only: no rc file, no environment. Used by tests and `--offline` demos.
    pub fn defaults() -> Self {
        Self::from_map(default_map(), default_config_path())
    }

    fn from_map(inner: HashMap<String, String>, config_path: PathBuf) -> Self {
        Self { inner, config_path }
    }

    fn merge_file(&mut self, path: &Path) {
        if let Ok(file) = fs::File::open(path) {
            let reader = BufReader::new(file);
            for line in reader.lines().map_while(Result::ok) {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((k, v)) = line.split_once('=') {
                    self.inner.insert(k.trim().to_string(), v.trim().to_string());
                }
            }
        }
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.inner.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).cloned()
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.parse::<usize>().ok())
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.parse::<u64>().ok())
    }

    pub fn get_f32(&self, key: &str) -> Option<f32> {
        self.get(key).and_then(|v| v.parse::<f32>().ok())
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).map(PathBuf::from)
    }

    /// API key for the agent endpoint. `API_KEY` wins over vendor-specific names.
    pub fn api_key(&self) -> Option<String> {
        ["API_KEY", "DEEPSEEK_API_KEY", "OPENAI_API_KEY"]
            .iter()
            .find_map(|k| self.get(k))
            .filter(|s| !s.trim().is_empty())
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.get_u64("EXEC_TIMEOUT").unwrap_or(10))
    }

    pub fn max_retries(&self) -> usize {
        self.get_usize("MAX_RETRIES").unwrap_or(3)
    }

    pub fn python_bin(&self) -> String {
        self.get("PYTHON_BIN").unwrap_or_else(|| "python3".into())
    }

    pub fn artifacts_path(&self) -> PathBuf {
        self.get_path("ARTIFACTS_DIR").unwrap_or_else(|| PathBuf::from("./artifacts"))
    }

    pub fn logs_path(&self) -> PathBuf {
        self.get_path("LOGS_DIR").unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn report_path(&self) -> PathBuf {
        self.get_path("REPORT_DIR").unwrap_or_else(|| PathBuf::from("./report"))
    }

    pub fn cache_path(&self) -> PathBuf {
        self.get_path("CACHE_PATH")
            .unwrap_or_else(|| env::temp_dir().join("edagent").join("cache"))
    }

    pub fn history_path(&self) -> PathBuf {
        self.get_path("HISTORY_PATH")
            .unwrap_or_else(|| env::temp_dir().join("edagent").join("history"))
    }
}

fn is_config_key(k: &str) -> bool {
    // Accept known keys or EDA_*/OPENAI_*/DEEPSEEK_* for forward-compat
    const KEYS: &[&str] = &[
        "API_KEY",
        "API_BASE_URL",
        "DEFAULT_MODEL",
        "REQUEST_TIMEOUT",
        "MAX_TOKENS",
        "TEMPERATURE",
        "PYTHON_BIN",
        "EXEC_TIMEOUT",
        "MAX_RETRIES",
        "REGEN_STRATEGY",
        "ARTIFACTS_DIR",
        "LOGS_DIR",
        "REPORT_DIR",
        "CACHE_PATH",
        "CACHE_LENGTH",
        "HISTORY_PATH",
        "HISTORY_LENGTH",
        "PRETTIFY_MARKDOWN",
    ];

    KEYS.contains(&k)
        || k.starts_with("EDA_")
        || k.starts_with("OPENAI_")
        || k.starts_with("DEEPSEEK_")
}

fn default_config_path() -> PathBuf {
    let base = BaseDirs::new()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.config"));
    base.join("edagent").join(".edagentrc")
}

fn default_map() -> HashMap<String, String> {
    let mut m = HashMap::new();
    // Paths
    let temp = env::temp_dir().join("edagent");

    m.insert("ARTIFACTS_DIR".into(), "./artifacts".into());
    m.insert("LOGS_DIR".into(), "./logs".into());
    m.insert("REPORT_DIR".into(), "./report".into());
    m.insert(
        "CACHE_PATH".into(),
        temp.join("cache").to_string_lossy().into_owned(),
    );
    m.insert(
        "HISTORY_PATH".into(),
        temp.join("history").to_string_lossy().into_owned(),
    );

    // Numbers
    m.insert("CACHE_LENGTH".into(), "100".into());
    m.insert("HISTORY_LENGTH".into(), "20".into());
    m.insert("REQUEST_TIMEOUT".into(), "30".into());
    m.insert("MAX_TOKENS".into(), "4000".into());
    m.insert("TEMPERATURE".into(), "0.1".into());
    m.insert("EXEC_TIMEOUT".into(), "10".into());
    m.insert("MAX_RETRIES".into(), "3".into());

    // Strings
    m.insert("DEFAULT_MODEL".into(), "deepseek-chat".into());
    m.insert("API_BASE_URL".into(), "https://api.deepseek.com".into());
    m.insert("PYTHON_BIN".into(), "python3".into());
    m.insert("REGEN_STRATEGY".into(), "regenerate".into());

    // Bools as strings
    m.insert("PRETTIFY_MARKDOWN".into(), "true".into());

    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_sandbox_settings() {
        let cfg = Config::defaults();
        assert_eq!(cfg.exec_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.max_retries(), 3);
        assert_eq!(cfg.python_bin(), "python3");
        assert!(cfg.get_bool("PRETTIFY_MARKDOWN"));
        assert_eq!(cfg.get("REGEN_STRATEGY").as_deref(), Some("regenerate"));
    }

    #[test]
    fn rc_file_lines_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let rc = dir.path().join(".edagentrc");
        fs::write(&rc, "# comment\nMAX_RETRIES = 5\n\nEXEC_TIMEOUT=2\nbroken line\n").unwrap();

        let mut cfg = Config::defaults();
        cfg.merge_file(&rc);
        assert_eq!(cfg.max_retries(), 5);
        assert_eq!(cfg.exec_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn api_key_prefers_generic_name() {
        let mut cfg = Config::defaults();
        assert!(cfg.api_key().is_none());
        cfg.set("DEEPSEEK_API_KEY", "ds");
        assert_eq!(cfg.api_key().as_deref(), Some("ds"));
        cfg.set("API_KEY", "generic");
        assert_eq!(cfg.api_key().as_deref(), Some("generic"));
        cfg.set("API_KEY", "  ");
        // a blank generic key still shadows the vendor one
        assert!(cfg.api_key().is_none());
    }

    #[test]
    fn env_key_filter() {
        assert!(is_config_key("MAX_RETRIES"));
        assert!(is_config_key("DEEPSEEK_API_KEY"));
        assert!(is_config_key("EDA_ANYTHING"));
        assert!(!is_config_key("HOME"));
    }
}
