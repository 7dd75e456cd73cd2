use std::fs;

/// 进程内存探针
///
/// `reclaim` 是内存超阈值时的回收钩子，默认什么都不做。
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait MemoryProbe: Send + Sync {
    /// 当前内存占用（字节），无法获取时返回 None
    fn usage_bytes(&self) -> Option<u64>;

    fn reclaim(&self) {}
}

/// 通过 `/proc/self/statm` 读取常驻内存
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessMemoryProbe;

const PAGE_SIZE: u64 = 4096;

impl MemoryProbe for ProcessMemoryProbe {
    fn usage_bytes(&self) -> Option<u64> {
        let statm = fs::read_to_string("/proc/self/statm").ok()?;
        parse_statm_rss(&statm)
    }
}

fn parse_statm_rss(statm: &str) -> Option<u64> {
    statm
        .split_whitespace()
        .nth(1)
        .and_then(|pages| pages.parse::<u64>().ok())
        .map(|pages| pages * PAGE_SIZE)
}

/// 本机主机名，获取失败时返回 "unknown"
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_statm() {
        assert_eq!(parse_statm_rss("2048 512 100 1 0 300 0\n"), Some(512 * 4096));
        assert_eq!(parse_statm_rss("garbage"), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_process_probe_reports_usage() {
        let usage = ProcessMemoryProbe.usage_bytes().unwrap();
        assert!(usage > 0);
    }

    #[test]
    fn test_hostname_not_empty() {
        assert!(!local_hostname().is_empty());
    }
}
