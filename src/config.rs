//! Server configuration
//!
//! Defaults, optionally overlaid by a TOML file (`CHRONOTICK_CONFIG`), then
//! by individual environment variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP/WebSocket server binds to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// SQLite file holding bar history
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Origins allowed by CORS
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Let stop/disconnect interrupt an in-flight replay wait
    #[serde(default)]
    pub interrupt_waits_on_stop: bool,

    /// Default tracing filter when RUST_LOG is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_db_path() -> String {
    "chronotick.db".to_string()
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:5173".to_string(),
        "http://127.0.0.1:5173".to_string(),
    ]
}

fn default_log_filter() -> String {
    "chronotick_backend=debug,tower_http=debug".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            db_path: default_db_path(),
            cors_origins: default_cors_origins(),
            interrupt_waits_on_stop: false,
            log_filter: default_log_filter(),
        }
    }
}

fn parse_flag(v: &str) -> bool {
    matches!(v.trim(), "1" | "true" | "TRUE" | "on" | "ON" | "yes")
}

impl ServerConfig {
    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    /// File named by `CHRONOTICK_CONFIG` (if any), then env overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("CHRONOTICK_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::load(path.trim())?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("CHRONOTICK_BIND").filter(|v| !v.trim().is_empty()) {
            self.bind_addr = v.trim().to_string();
        }
        if let Some(v) = var("BARS_DB_PATH").filter(|v| !v.trim().is_empty()) {
            self.db_path = v.trim().to_string();
        }
        if let Some(v) = var("CHRONOTICK_CORS_ORIGINS") {
            self.cors_origins = v
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        if let Some(v) = var("REPLAY_INTERRUPT_WAITS") {
            self.interrupt_waits_on_stop = parse_flag(&v);
        }
    }

    /// `db_path` resolved against `base` when relative.
    pub fn resolved_db_path(&self, base: &Path) -> String {
        let p = PathBuf::from(&self.db_path);
        if p.is_absolute() {
            return self.db_path.clone();
        }
        base.join(p).to_string_lossy().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:8000");
        assert_eq!(config.cors_origins.len(), 2);
        assert!(!config.interrupt_waits_on_stop);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("CHRONOTICK_BIND", "127.0.0.1:9000"),
            ("BARS_DB_PATH", "/data/bars.db"),
            ("CHRONOTICK_CORS_ORIGINS", "http://a.test, http://b.test,"),
            ("REPLAY_INTERRUPT_WAITS", "1"),
        ]
        .into_iter()
        .collect();

        let mut config = ServerConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.db_path, "/data/bars.db");
        assert_eq!(config.cors_origins, vec!["http://a.test", "http://b.test"]);
        assert!(config.interrupt_waits_on_stop);
    }

    #[test]
    fn test_load_toml_with_partial_fields() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "db_path = \"replay.db\"\ninterrupt_waits_on_stop = true").unwrap();

        let config = ServerConfig::load(file.path()).unwrap();
        assert_eq!(config.db_path, "replay.db");
        assert!(config.interrupt_waits_on_stop);
        assert_eq!(config.bind_addr, "0.0.0.0:8000");
    }

    #[test]
    fn test_resolved_db_path() {
        let config = ServerConfig::default();
        assert_eq!(
            config.resolved_db_path(Path::new("/srv/chronotick")),
            "/srv/chronotick/chronotick.db"
        );

        let absolute = ServerConfig {
            db_path: "/var/lib/bars.db".to_string(),
            ..ServerConfig::default()
        };
        assert_eq!(absolute.resolved_db_path(Path::new("/srv")), "/var/lib/bars.db");
    }
}
