use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from agentops.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub data: DataConfig,
    pub agent: AgentConfig,
    pub qa: QaConfig,
    pub serve: ServeConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Root for the sample CSV, uploads and QA results.
    pub dir: PathBuf,
    /// Run-log CSV, relative to `dir` unless absolute.
    pub csv_file: PathBuf,
    pub table: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub command: String,
    pub args: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct QaConfig {
    /// Test case file or glob pattern.
    pub cases: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    pub bind: String,
    pub port: u16,
}

// --- Default implementations ---

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data"),
            csv_file: PathBuf::from("sample_agent_runs.csv"),
            table: crate::ingest::DEFAULT_TABLE.to_string(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "agent".to_string(),
            args: vec!["--json".to_string()],
        }
    }
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            cases: "qa/test_cases.json".to_string(),
        }
    }
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

impl AppConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let cfg = AppConfig::load(Path::new("/nonexistent/agentops.toml")).unwrap();
        assert_eq!(cfg.data.dir, PathBuf::from("data"));
        assert_eq!(cfg.data.table, "agent_runs");
        assert_eq!(cfg.serve.port, 8000);
        assert_eq!(cfg.qa.cases, "qa/test_cases.json");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agentops.toml");
        std::fs::write(
            &path,
            "[agent]\ncommand = \"python3\"\nargs = [\"agent/cli.py\"]\n\n[serve]\nport = 9001\n",
        )
        .unwrap();

        let cfg = AppConfig::load(&path).unwrap();
        assert_eq!(cfg.agent.command, "python3");
        assert_eq!(cfg.agent.args, vec!["agent/cli.py"]);
        assert_eq!(cfg.serve.port, 9001);
        assert_eq!(cfg.serve.bind, "127.0.0.1");
        assert_eq!(cfg.data.csv_file, PathBuf::from("sample_agent_runs.csv"));
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agentops.toml");
        std::fs::write(&path, "[serve\nport = ").unwrap();
        assert!(matches!(
            AppConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
