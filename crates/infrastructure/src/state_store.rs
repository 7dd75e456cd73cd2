use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use scheduler_core::{SchedulerError, SchedulerResult, StateSnapshot, StateStore};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// 以 JSON 文件保存状态快照，写入时先写临时文件再原子重命名
#[derive(Debug, Clone)]
pub struct JsonFileStateStore {
    path: PathBuf,
}

impl JsonFileStateStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "state".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StateStore for JsonFileStateStore {
    async fn load(&self) -> SchedulerResult<Option<StateSnapshot>> {
        let content = match fs::read(&self.path).await {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(SchedulerError::persistence_error(format!(
                    "读取状态文件失败 {}: {err}",
                    self.path.display()
                )))
            }
        };
        let snapshot = serde_json::from_slice(&content).map_err(|e| {
            SchedulerError::persistence_error(format!(
                "状态文件格式错误 {}: {e}",
                self.path.display()
            ))
        })?;
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &StateSnapshot) -> SchedulerResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let payload = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.temp_path();
        {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(&payload).await?;
            file.sync_all().await?;
        }
        fs::rename(&tmp, &self.path).await.map_err(|e| {
            SchedulerError::persistence_error(format!(
                "重命名状态文件失败 {}: {e}",
                self.path.display()
            ))
        })?;

        debug!(path = %self.path.display(), jobs = snapshot.jobs.len(), "状态快照已写入");
        Ok(())
    }
}
