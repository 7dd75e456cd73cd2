use std::time::Duration;

use ::redis::aio::ConnectionManager;
use ::redis::{Client, RedisError, Script};
use async_trait::async_trait;
use scheduler_core::{LeaderInfo, LockBackend, SchedulerError, SchedulerResult};
use tracing::{debug, info, warn};

/// 记录属于 ARGV[1] 时写入新记录并刷新过期时间
const RENEW_SCRIPT: &str = r#"
local current = redis.call("get", KEYS[1])
if not current then
    return 0
end
local ok, record = pcall(cjson.decode, current)
if ok and type(record) == "table" and record.instance_id == ARGV[1] then
    redis.call("set", KEYS[1], ARGV[2], "PX", ARGV[3])
    return 1
end
return 0
"#;

/// 记录属于 ARGV[1] 时删除
const RELEASE_SCRIPT: &str = r#"
local current = redis.call("get", KEYS[1])
if not current then
    return 0
end
local ok, record = pcall(cjson.decode, current)
if ok and type(record) == "table" and record.instance_id == ARGV[1] then
    return redis.call("del", KEYS[1])
end
return 0
"#;

/// Redis 锁：`SET NX PX` 原子获取，值为 JSON 格式的 [`LeaderInfo`]
///
/// 续期和释放通过 Lua 脚本在服务端比较持有者后再写入，检查与修改之间不会被其他实例插入。
#[derive(Clone)]
pub struct RedisLockBackend {
    conn: ConnectionManager,
    key: String,
    renew_script: Script,
    release_script: Script,
}

impl RedisLockBackend {
    pub async fn connect(url: &str, key: &str) -> SchedulerResult<Self> {
        info!("连接Redis锁服务: {}", redact_url(url));
        let client = Client::open(url).map_err(map_redis_error)?;
        let mut conn = client
            .get_connection_manager()
            .await
            .map_err(map_redis_error)?;

        let _: String = ::redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        Ok(Self {
            conn,
            key: key.to_string(),
            renew_script: Script::new(RENEW_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    async fn set(&self, info: &LeaderInfo, ttl: Duration, only_if_absent: bool) -> SchedulerResult<bool> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(info)?;
        let mut cmd = ::redis::cmd("SET");
        cmd.arg(&self.key).arg(payload);
        if only_if_absent {
            cmd.arg("NX");
        }
        cmd.arg("PX").arg(ttl_millis(ttl));

        let result: Option<String> = cmd.query_async(&mut conn).await.map_err(map_redis_error)?;
        Ok(result.is_some())
    }
}

#[async_trait]
impl LockBackend for RedisLockBackend {
    async fn try_acquire(&self, info: &LeaderInfo, ttl: Duration) -> SchedulerResult<bool> {
        self.set(info, ttl, true).await
    }

    async fn renew(&self, info: &LeaderInfo, ttl: Duration) -> SchedulerResult<bool> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(info)?;
        let renewed: i64 = self
            .renew_script
            .key(&self.key)
            .arg(&info.instance_id)
            .arg(payload)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(renewed == 1)
    }

    async fn read(&self) -> SchedulerResult<Option<LeaderInfo>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = ::redis::cmd("GET")
            .arg(&self.key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        Ok(value.and_then(|raw| match serde_json::from_str(&raw) {
            Ok(info) => Some(info),
            Err(err) => {
                warn!(key = %self.key, "锁记录无法解析: {err}");
                None
            }
        }))
    }

    async fn release(&self, instance_id: &str) -> SchedulerResult<()> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release_script
            .key(&self.key)
            .arg(instance_id)
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        if deleted == 0 {
            debug!(key = %self.key, instance_id, "锁已不属于当前实例，跳过释放");
        }
        Ok(())
    }

    async fn force_acquire(&self, info: &LeaderInfo, ttl: Duration) -> SchedulerResult<()> {
        self.set(info, ttl, false).await.map(|_| ())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

fn map_redis_error(err: RedisError) -> SchedulerError {
    SchedulerError::lock_error(err.to_string())
}

/// 日志中隐藏URL里的密码
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
