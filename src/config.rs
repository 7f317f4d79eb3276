use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct EveryPollConfig {
    /// Durable database file
    pub database: Option<String>,
    /// Directory for the durable and per-process database files
    pub data_dir: Option<String>,
    pub busy_timeout_ms: Option<u64>,
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("everypoll.toml")
}

pub fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<EveryPollConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: EveryPollConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &EveryPollConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> std::io::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("everypoll.toml");
        let config = EveryPollConfig {
            database: Some("polls.db".into()),
            data_dir: None,
            busy_timeout_ms: Some(1000),
        };

        write_config(&path, &config, false).unwrap();
        assert!(write_config(&path, &config, false).is_err());
        write_config(&path, &config, true).unwrap();

        let loaded = load_config(Some(&path)).unwrap().unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_ensure_db_dir_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("nested").join("deeper").join("x.db");
        ensure_db_dir(&db).unwrap();
        assert!(db.parent().unwrap().is_dir());
    }
}
