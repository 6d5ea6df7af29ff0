use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub annotator: AnnotatorConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8501".to_string()
}

/// Root of the working directory layout (`data/`, `test_data/...`).
#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

/// The implicit single annotator recorded on every annotation.
#[derive(Debug, Deserialize, Clone)]
pub struct AnnotatorConfig {
    #[serde(default = "default_annotator_id")]
    pub id: String,
    #[serde(default = "default_role")]
    pub role: String,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        Self {
            id: default_annotator_id(),
            role: default_role(),
        }
    }
}

fn default_annotator_id() -> String {
    "user1".to_string()
}
fn default_role() -> String {
    "annotator".to_string()
}

impl Config {
    /// Config with every default, rooted at `root`. Used by tests and by
    /// commands that can run without a config file.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            db: DbConfig {
                path: root.join("annotation_platform.db"),
            },
            server: ServerConfig::default(),
            workspace: WorkspaceConfig {
                root: root.to_path_buf(),
            },
            annotator: AnnotatorConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.db.path.as_os_str().is_empty() {
        anyhow::bail!("db.path must not be empty");
    }

    if config.server.bind.parse::<SocketAddr>().is_err() {
        anyhow::bail!(
            "server.bind must be a socket address like 127.0.0.1:8501, got '{}'",
            config.server.bind
        );
    }

    if config.annotator.id.trim().is_empty() {
        anyhow::bail!("annotator.id must not be empty");
    }

    Ok(())
}
