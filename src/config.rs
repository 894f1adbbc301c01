use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct Config {
    pub backend: BackendConfig,
    pub inbox: InboxConfig,
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub workers: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxConfig {
    pub priority: Option<String>,
    pub limit: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Allow `send` while a draft generation for the same email is pending.
    pub send_during_generate: bool,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "failed to parse config file: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    backend: RawBackendConfig,
    #[serde(default)]
    inbox: RawInboxConfig,
    #[serde(default)]
    policy: RawPolicyConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBackendConfig {
    #[serde(default = "default_base_url")]
    base_url: String,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
    #[serde(default = "default_workers")]
    workers: usize,
}

impl Default for RawBackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            workers: default_workers(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawInboxConfig {
    #[serde(default)]
    priority: Option<String>,
    #[serde(default = "default_limit")]
    limit: u32,
}

impl Default for RawInboxConfig {
    fn default() -> Self {
        Self {
            priority: None,
            limit: default_limit(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPolicyConfig {
    #[serde(default)]
    send_during_generate: bool,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_workers() -> usize {
    4
}

fn default_limit() -> u32 {
    100
}

impl Default for Config {
    fn default() -> Self {
        Config {
            backend: BackendConfig {
                base_url: default_base_url(),
                timeout_secs: default_timeout_secs(),
                workers: default_workers(),
            },
            inbox: InboxConfig {
                priority: None,
                limit: default_limit(),
            },
            policy: PolicyConfig::default(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let base_url = raw.backend.base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::Parse(format!(
                "base_url '{}' must start with http:// or https://",
                raw.backend.base_url
            )));
        }
        if raw.backend.workers == 0 {
            return Err(ConfigError::Parse(
                "workers must be at least 1 in [backend]".to_string(),
            ));
        }
        if raw.backend.timeout_secs == 0 {
            return Err(ConfigError::Parse(
                "timeout_secs must be at least 1 in [backend]".to_string(),
            ));
        }
        if raw.inbox.limit == 0 {
            return Err(ConfigError::Parse(
                "limit must be at least 1 in [inbox]".to_string(),
            ));
        }

        let priority = raw
            .inbox
            .priority
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        Ok(Config {
            backend: BackendConfig {
                base_url,
                timeout_secs: raw.backend.timeout_secs,
                workers: raw.backend.workers,
            },
            inbox: InboxConfig {
                priority,
                limit: raw.inbox.limit,
            },
            policy: PolicyConfig {
                send_during_generate: raw.policy.send_during_generate,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.backend.base_url, "http://localhost:8000");
        assert_eq!(config.backend.timeout_secs, 30);
        assert_eq!(config.backend.workers, 4);
        assert_eq!(config.inbox.limit, 100);
        assert_eq!(config.inbox.priority, None);
        assert!(!config.policy.send_during_generate);
    }

    #[test]
    fn test_full_config() {
        let config = Config::parse(
            r#"
[backend]
base_url = "https://triage.example.com/"
timeout_secs = 5
workers = 2

[inbox]
priority = "Urgent"
limit = 25

[policy]
send_during_generate = true
"#,
        )
        .unwrap();

        assert_eq!(config.backend.base_url, "https://triage.example.com");
        assert_eq!(config.backend.timeout_secs, 5);
        assert_eq!(config.backend.workers, 2);
        assert_eq!(config.inbox.priority.as_deref(), Some("Urgent"));
        assert_eq!(config.inbox.limit, 25);
        assert!(config.policy.send_during_generate);
    }

    #[test]
    fn test_blank_priority_is_no_filter() {
        let config = Config::parse("[inbox]\npriority = \"  \"").unwrap();
        assert_eq!(config.inbox.priority, None);
    }

    #[test]
    fn test_unknown_section_or_key_errors() {
        let err = Config::parse("[bogus]\nfoo = \"bar\"").unwrap_err();
        match err {
            ConfigError::Parse(msg) => assert!(msg.contains("unknown field"), "got: {}", msg),
            _ => panic!("expected parse error"),
        }

        let err = Config::parse("[backend]\nretries = 3").unwrap_err();
        match err {
            ConfigError::Parse(msg) => assert!(msg.contains("unknown field"), "got: {}", msg),
            _ => panic!("expected parse error"),
        }
    }

    #[test]
    fn test_invalid_values() {
        let cases = [
            ("[backend]\nbase_url = \"localhost:8000\"", "must start with http"),
            ("[backend]\nworkers = 0", "workers"),
            ("[backend]\ntimeout_secs = 0", "timeout_secs"),
            ("[inbox]\nlimit = 0", "limit"),
        ];
        for (input, needle) in cases {
            match Config::parse(input).unwrap_err() {
                ConfigError::Parse(msg) => assert!(msg.contains(needle), "got: {}", msg),
                _ => panic!("expected parse error for {}", input),
            }
        }
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
