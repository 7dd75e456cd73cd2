use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use scheduler_core::{LeaderInfo, LockBackend, SchedulerError, SchedulerResult};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// 共享文件系统上的锁文件，内容为 JSON 格式的 [`LeaderInfo`]
///
/// 过期判断依赖文件里的心跳时间，TTL 参数在这里不起作用。
#[derive(Debug, Clone)]
pub struct FileLockBackend {
    path: PathBuf,
}

impl FileLockBackend {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure_parent(&self) -> SchedulerResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        Ok(())
    }

    /// 写临时文件再重命名，读者不会看到写了一半的内容
    async fn write_atomic(&self, info: &LeaderInfo) -> SchedulerResult<()> {
        self.ensure_parent().await?;
        let tmp = self.path.with_extension(format!(
            "{}.tmp",
            uuid::Uuid::new_v4().simple()
        ));
        let payload = serde_json::to_vec(info)?;
        {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(&payload).await?;
            file.sync_all().await?;
        }
        if let Err(err) = fs::rename(&tmp, &self.path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(err.into());
        }
        Ok(())
    }
}

#[async_trait]
impl LockBackend for FileLockBackend {
    async fn try_acquire(&self, info: &LeaderInfo, _ttl: Duration) -> SchedulerResult<bool> {
        self.ensure_parent().await?;
        let open = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .await;
        let mut file = match open {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        file.write_all(&serde_json::to_vec(info)?).await?;
        file.sync_all().await?;
        debug!(path = %self.path.display(), instance_id = %info.instance_id, "锁文件已创建");
        Ok(true)
    }

    async fn renew(&self, info: &LeaderInfo, _ttl: Duration) -> SchedulerResult<bool> {
        match self.read().await? {
            Some(current) if current.instance_id == info.instance_id => {
                self.write_atomic(info).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn read(&self) -> SchedulerResult<Option<LeaderInfo>> {
        let content = match fs::read(&self.path).await {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_slice(&content) {
            Ok(info) => Ok(Some(info)),
            Err(err) => {
                // 内容损坏的锁文件视为不存在，允许被接管
                warn!(path = %self.path.display(), "锁文件内容无法解析: {err}");
                Ok(None)
            }
        }
    }

    async fn release(&self, instance_id: &str) -> SchedulerResult<()> {
        match self.read().await? {
            Some(current) if current.instance_id == instance_id => {
                match fs::remove_file(&self.path).await {
                    Ok(()) => Ok(()),
                    Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
                    Err(err) => Err(SchedulerError::lock_error(format!(
                        "删除锁文件失败: {err}"
                    ))),
                }
            }
            _ => Ok(()),
        }
    }

    async fn force_acquire(&self, info: &LeaderInfo, _ttl: Duration) -> SchedulerResult<()> {
        self.write_atomic(info).await
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TTL: Duration = Duration::from_secs(30);

    fn backend(dir: &TempDir) -> FileLockBackend {
        FileLockBackend::new(dir.path().join("nested").join("leader.lock"))
    }

    #[tokio::test]
    async fn test_acquire_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let lock = backend(&dir);

        assert!(lock.try_acquire(&LeaderInfo::new("a"), TTL).await.unwrap());
        assert!(!lock.try_acquire(&LeaderInfo::new("b"), TTL).await.unwrap());

        let holder = lock.read().await.unwrap().unwrap();
        assert_eq!(holder.instance_id, "a");
    }

    #[tokio::test]
    async fn test_renew_only_by_owner() {
        let dir = TempDir::new().unwrap();
        let lock = backend(&dir);
        let mut info = LeaderInfo::new("a");
        lock.try_acquire(&info, TTL).await.unwrap();

        info.heartbeat(info.last_heartbeat + chrono::Duration::seconds(5));
        assert!(lock.renew(&info, TTL).await.unwrap());
        let stored = lock.read().await.unwrap().unwrap();
        assert_eq!(stored.last_heartbeat, info.last_heartbeat);

        assert!(!lock.renew(&LeaderInfo::new("b"), TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_ignores_foreign_lock() {
        let dir = TempDir::new().unwrap();
        let lock = backend(&dir);
        lock.try_acquire(&LeaderInfo::new("a"), TTL).await.unwrap();

        lock.release("b").await.unwrap();
        assert!(lock.read().await.unwrap().is_some());

        lock.release("a").await.unwrap();
        assert!(lock.read().await.unwrap().is_none());
        // 重复释放无副作用
        lock.release("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_force_acquire_overwrites() {
        let dir = TempDir::new().unwrap();
        let lock = backend(&dir);
        lock.try_acquire(&LeaderInfo::new("a"), TTL).await.unwrap();

        lock.force_acquire(&LeaderInfo::new("b"), TTL).await.unwrap();
        assert_eq!(lock.read().await.unwrap().unwrap().instance_id, "b");
    }

    #[tokio::test]
    async fn test_corrupt_lock_reads_as_absent() {
        let dir = TempDir::new().unwrap();
        let lock = backend(&dir);
        tokio::fs::create_dir_all(lock.path().parent().unwrap())
            .await
            .unwrap();
        tokio::fs::write(lock.path(), b"{not json").await.unwrap();

        assert!(lock.read().await.unwrap().is_none());
        assert_eq!(lock.name(), "file");
    }
}
