use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;

use crate::{SchedulerError, SchedulerResult};

/// CRON表达式解析工具，按任务时区计算下一次触发时间
#[derive(Debug, Clone)]
pub struct CronParser {
    schedule: Schedule,
    timezone: Tz,
}

impl CronParser {
    /// 创建新的CRON解析器
    ///
    /// `cron` crate 需要6或7个字段（含秒），标准5字段表达式会自动补齐秒字段。
    pub fn new(cron_expr: &str, timezone: Option<&str>) -> SchedulerResult<Self> {
        let schedule = Schedule::from_str(&normalize(cron_expr)).map_err(|e| {
            SchedulerError::InvalidCron {
                expr: cron_expr.to_string(),
                message: e.to_string(),
            }
        })?;
        let timezone = parse_timezone(timezone)?;

        Ok(Self { schedule, timezone })
    }

    /// 验证CRON表达式是否有效
    pub fn validate_cron_expression(cron_expr: &str) -> SchedulerResult<()> {
        Self::new(cron_expr, None).map(|_| ())
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// 获取严格晚于 `from` 的下一次执行时间
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&from.with_timezone(&self.timezone))
            .next()
            .map(|next| next.with_timezone(&Utc))
    }

    /// 获取从指定时间开始的多个执行时间
    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule
            .after(&from.with_timezone(&self.timezone))
            .take(count)
            .map(|next| next.with_timezone(&Utc))
            .collect()
    }

    /// 计算下次执行时间距离现在的时长
    pub fn time_until_next_execution(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.next_execution_time(now).map(|next| next - now)
    }
}

/// 解析IANA时区名称，未指定时使用UTC
pub fn parse_timezone(timezone: Option<&str>) -> SchedulerResult<Tz> {
    match timezone {
        None => Ok(Tz::UTC),
        Some(name) => name
            .parse::<Tz>()
            .map_err(|_| SchedulerError::InvalidTimezone(name.to_string())),
    }
}

fn normalize(cron_expr: &str) -> String {
    let trimmed = cron_expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn test_next_execution_every_minute() {
        let parser = CronParser::new("0 * * * * *", None).unwrap();
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 10, 30, 15).unwrap();
        let next = parser.next_execution_time(from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 10, 31, 0).unwrap());
    }

    #[test]
    fn test_five_field_expression_accepted() {
        let parser = CronParser::new("*/5 * * * *", None).unwrap();
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 10, 31, 0).unwrap();
        let next = parser.next_execution_time(from).unwrap();
        assert_eq!(next.minute(), 35);
        assert_eq!(next.second(), 0);
    }

    #[test]
    fn test_timezone_shifts_next_run() {
        // 每天上海时间 09:00 等于 UTC 01:00
        let parser = CronParser::new("0 0 9 * * *", Some("Asia/Shanghai")).unwrap();
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let next = parser.next_execution_time(from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap());
    }

    #[test]
    fn test_next_execution_strictly_after_from() {
        let parser = CronParser::new("0 0 * * * *", None).unwrap();
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let next = parser.next_execution_time(from).unwrap();
        assert!(next > from);
    }

    #[test]
    fn test_upcoming_times() {
        let parser = CronParser::new("0 0 * * * *", None).unwrap();
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 10, 30, 0).unwrap();
        let times = parser.upcoming_times(from, 3);
        assert_eq!(times.len(), 3);
        assert_eq!(times[0].hour(), 11);
        assert_eq!(times[2].hour(), 13);
    }

    #[test]
    fn test_invalid_expression_and_timezone() {
        assert!(matches!(
            CronParser::new("not a cron", None),
            Err(SchedulerError::InvalidCron { .. })
        ));
        assert!(matches!(
            CronParser::new("0 * * * * *", Some("Mars/Olympus")),
            Err(SchedulerError::InvalidTimezone(_))
        ));
        assert!(CronParser::validate_cron_expression("0 0 12 * * *").is_ok());
    }

    #[test]
    fn test_time_until_next_execution() {
        let parser = CronParser::new("0 * * * * *", None).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 30, 45).unwrap();
        let until = parser.time_until_next_execution(now).unwrap();
        assert_eq!(until.num_seconds(), 15);
    }
}
