//! coursewatch configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable holding a raw MoodleSession cookie value
pub const SESSION_ENV: &str = "MOODLE_SESSION";

/// Main coursewatch configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Target site layout
    pub site: SiteConfig,

    /// HTTP client and retry settings
    pub http: HttpConfig,

    /// Defaults for watch runs
    pub watch: WatchDefaults,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Explicit path, else the first readable candidate file, else defaults
    ///
    /// An explicit path must load. A broken candidate is logged and skipped.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        for candidate in Self::candidate_paths() {
            if !candidate.exists() {
                continue;
            }
            match Self::load_from_file(&candidate) {
                Ok(config) => return Ok(config),
                Err(e) => tracing::warn!(path = %candidate.display(), error = %e, "Config::load: skipping unreadable file"),
            }
        }

        tracing::info!("Config::load: no config file, using defaults");
        Ok(Self::default())
    }

    /// `./.coursewatch.yml`, then `coursewatch/coursewatch.yml` under the user config dir
    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(".coursewatch.yml")];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("coursewatch").join("coursewatch.yml"));
        }
        paths
    }

    /// Read only the log level, before logging is initialized
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|c| c.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Invalid coursewatch YAML")?;
        tracing::debug!(path = %path.display(), "Config::load_from_file: loaded");
        Ok(config)
    }
}

/// Target site layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Site root, without trailing slash
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Page fetched to resolve a session key when none is at hand
    #[serde(rename = "entry-path")]
    pub entry_path: String,

    /// JSON-RPC service endpoint
    #[serde(rename = "service-path")]
    pub service_path: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://courses.gdut.edu.cn".to_string(),
            entry_path: "/my/".to_string(),
            service_path: "/lib/ajax/service.php".to_string(),
        }
    }
}

/// HTTP client and retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Attempts per request, including the first
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Backoff base; attempt n sleeps n times this
    #[serde(rename = "backoff-ms")]
    pub backoff_ms: u64,

    #[serde(rename = "user-agent")]
    pub user_agent: String,

    pub accept: String,

    #[serde(rename = "accept-language")]
    pub accept_language: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 20_000,
            max_attempts: 3,
            backoff_ms: 800,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
                         Chrome/119.0 Safari/537.36"
                .to_string(),
            accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
            accept_language: "zh-CN,zh;q=0.9,en;q=0.8".to_string(),
        }
    }
}

/// Defaults for watch runs, overridable per command
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchDefaults {
    /// How long to keep submitting progress for one video
    #[serde(rename = "duration-secs")]
    pub duration_secs: u64,

    /// Pause between submissions
    #[serde(rename = "interval-secs")]
    pub interval_secs: u64,

    /// Pause between videos in a batch
    #[serde(rename = "gap-secs")]
    pub gap_secs: u64,
}

impl Default for WatchDefaults {
    fn default() -> Self {
        Self {
            duration_secs: 300,
            interval_secs: 60,
            gap_secs: 5,
        }
    }
}

/// Build the Cookie header
///
/// Priority: full header, then a raw MoodleSession value, then the
/// `MOODLE_SESSION` environment value.
pub fn resolve_cookie_header(
    cookie_header: Option<&str>,
    cookie_value: Option<&str>,
    env_value: Option<&str>,
) -> Option<String> {
    if let Some(header) = cookie_header.map(str::trim).filter(|h| !h.is_empty()) {
        return Some(header.to_string());
    }

    cookie_value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| env_value.map(str::trim).filter(|v| !v.is_empty()))
        .map(|raw| format!("MoodleSession={}", raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.site.base_url, "https://courses.gdut.edu.cn");
        assert_eq!(config.site.service_path, "/lib/ajax/service.php");
        assert_eq!(config.http.max_attempts, 3);
        assert_eq!(config.http.backoff_ms, 800);
        assert_eq!(config.watch.duration_secs, 300);
        assert_eq!(config.watch.interval_secs, 60);
        assert_eq!(config.watch.gap_secs, 5);
        assert!(config.log_level.is_none());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
site:
  base-url: https://moodle.example.edu
  entry-path: /dashboard/

http:
  timeout-ms: 5000
  max-attempts: 5
  backoff-ms: 250

watch:
  duration-secs: 900
  interval-secs: 45
  gap-secs: 10

log-level: debug
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.site.base_url, "https://moodle.example.edu");
        assert_eq!(config.site.entry_path, "/dashboard/");
        assert_eq!(config.site.service_path, "/lib/ajax/service.php");
        assert_eq!(config.http.timeout_ms, 5000);
        assert_eq!(config.http.max_attempts, 5);
        assert_eq!(config.http.backoff_ms, 250);
        assert_eq!(config.watch.duration_secs, 900);
        assert_eq!(config.watch.interval_secs, 45);
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
watch:
  interval-secs: 30
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.watch.interval_secs, 30);
        assert_eq!(config.watch.duration_secs, 300);
        assert_eq!(config.http.max_attempts, 3);
        assert_eq!(config.site.base_url, "https://courses.gdut.edu.cn");
    }

    #[test]
    fn test_load_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "http:\n  max-attempts: 7").unwrap();

        let config = Config::load(Some(&file.path().to_path_buf())).unwrap();
        assert_eq!(config.http.max_attempts, 7);
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let path = PathBuf::from("/nonexistent/coursewatch.yml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_load_invalid_yaml_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "http: [not, a, map").unwrap();
        assert!(Config::load(Some(&file.path().to_path_buf())).is_err());
    }

    #[test]
    fn test_candidate_paths_start_with_project_file() {
        let paths = Config::candidate_paths();
        assert_eq!(paths[0], PathBuf::from(".coursewatch.yml"));
        assert!(paths.iter().skip(1).all(|p| p.ends_with("coursewatch/coursewatch.yml")));
    }

    #[test]
    fn test_cookie_header_priority() {
        assert_eq!(
            resolve_cookie_header(Some(" MoodleSession=full "), Some("raw"), Some("env")),
            Some("MoodleSession=full".to_string())
        );
        assert_eq!(
            resolve_cookie_header(None, Some("wd5061qf"), Some("env")),
            Some("MoodleSession=wd5061qf".to_string())
        );
        assert_eq!(
            resolve_cookie_header(Some("  "), Some(""), Some("fromenv")),
            Some("MoodleSession=fromenv".to_string())
        );
        assert_eq!(resolve_cookie_header(None, None, Some("   ")), None);
        assert_eq!(resolve_cookie_header(None, None, None), None);
    }
}
