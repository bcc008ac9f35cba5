use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::AppConfig;
use crate::error::{AppError, Result};

/// Configuration store backed by a TOML file
///
/// Uses `ArcSwap` for lock-free reads.
#[derive(Clone)]
pub struct ConfigStore {
    path: PathBuf,
    cache: Arc<ArcSwap<AppConfig>>,
}

impl ConfigStore {
    /// Open the store, writing defaults if the file does not exist yet
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let config = match tokio::fs::read_to_string(path).await {
            Ok(text) => toml::from_str(&text)
                .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("Writing default configuration to {}", path.display());
                let config = AppConfig::default();
                Self::save(path, &config).await?;
                config
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path: path.to_path_buf(),
            cache: Arc::new(ArcSwap::from_pointee(config)),
        })
    }

    async fn save(path: &Path, config: &AppConfig) -> Result<()> {
        let text = toml::to_string_pretty(config).map_err(|e| AppError::Config(e.to_string()))?;
        tokio::fs::write(path, text).await?;
        Ok(())
    }

    /// Get current configuration (lock-free)
    pub fn get(&self) -> Arc<AppConfig> {
        self.cache.load_full()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webrtc::config::RestartPolicy;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_config_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("cloudapp-rtc.toml");

        let store = ConfigStore::new(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(store.get().webrtc.restart_policy, RestartPolicy::Once);

        tokio::fs::write(
            &path,
            "[relay]\nurl = \"ws://10.0.0.5:9000/ws\"\n\n[webrtc]\nrestart_policy = \"renegotiate\"\n",
        )
        .await
        .unwrap();

        // Reopen picks up the edited file
        let store2 = ConfigStore::new(&path).await.unwrap();
        let config = store2.get();
        assert_eq!(config.relay.url, "ws://10.0.0.5:9000/ws");
        assert_eq!(config.webrtc.restart_policy, RestartPolicy::Renegotiate);
    }

    #[tokio::test]
    async fn test_invalid_file_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        tokio::fs::write(&path, "relay = 5").await.unwrap();

        let err = ConfigStore::new(&path).await.err().unwrap();
        assert!(matches!(err, AppError::Config(_)));
    }
}
