use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "kylrix";
pub const APP_NAME: &str = "vault";

pub fn data_dir() -> anyhow::Result<PathBuf> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

/// `--data-dir` wins, then `KX_VAULT_DATA_DIR`, then the platform default.
pub fn resolve_data_dir(override_dir: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(dir) = override_dir {
        return Ok(dir);
    }
    if let Ok(dir) = std::env::var("KX_VAULT_DATA_DIR") {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    data_dir()
}

/// Remote row store document.
pub fn remote_store_path(data: &Path) -> PathBuf {
    data.join("remote.json")
}

/// Durable local tier.
pub fn local_store_path(data: &Path) -> PathBuf {
    data.join("local.json")
}

pub fn config_path(data: &Path) -> PathBuf {
    data.join("config.json")
}
