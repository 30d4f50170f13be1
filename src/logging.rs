use crate::error::BalancerError;
use crate::pool::EndpointDescriptor;
use crate::retry::{Decision, RetryContext};
use std::time::Duration;

/// 日志等级：
/// - off：不输出逐请求日志
/// - low：每个逻辑请求结束时输出结果（成功/失败、耗时、重试计数）
/// - medium：额外输出每一次尝试（代理、重试计数、耗时）
/// - high：额外输出重试决策与代理池刷新后的完整列表
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    #[default]
    Off = 0,
    Low = 1,
    Medium = 2,
    High = 3,
}

impl LogLevel {
    pub fn parse(debug: &str) -> Self {
        match debug.trim().to_lowercase().as_str() {
            "low" | "outcome" => Self::Low,
            "medium" | "attempt" => Self::Medium,
            "high" | "all" | "verbose" => Self::High,
            _ => Self::Off,
        }
    }

    pub fn outcome_enabled(self) -> bool {
        self >= Self::Low
    }

    pub fn attempt_enabled(self) -> bool {
        self >= Self::Medium
    }

    pub fn verbose_enabled(self) -> bool {
        self >= Self::High
    }
}

pub fn format_duration_ms(d: Duration) -> i64 {
    d.as_millis().min(i64::MAX as u128) as i64
}

pub fn request_succeeded(url: &str, duration: Duration, ctx: &RetryContext) {
    tracing::info!(
        url = %url,
        elapsed_ms = format_duration_ms(duration),
        retry_count = ctx.retry_count,
        ips_tried = ctx.ips_tried,
        "[请求完成] 成功"
    );
}

pub fn request_failed(url: &str, duration: Duration, err: &BalancerError) {
    tracing::warn!(
        url = %url,
        elapsed_ms = format_duration_ms(duration),
        error = %err,
        "[请求完成] 失败"
    );
}

pub fn attempt_started(endpoint: &EndpointDescriptor, ctx: &RetryContext) {
    tracing::info!(
        endpoint = %endpoint,
        retry_count = ctx.retry_count,
        times_this_ip_retried = ctx.times_this_ip_retried,
        ips_tried = ctx.ips_tried,
        "[尝试] 开始"
    );
}

pub fn attempt_failed(endpoint: &EndpointDescriptor, duration: Duration, err: &BalancerError) {
    tracing::info!(
        endpoint = %endpoint,
        elapsed_ms = format_duration_ms(duration),
        error = %err,
        "[尝试] 失败"
    );
}

pub fn retry_decision(err: &BalancerError, ctx: &RetryContext, decision: Decision) {
    tracing::info!(
        error = %err,
        retry_count = ctx.retry_count,
        times_this_ip_retried = ctx.times_this_ip_retried,
        ips_tried = ctx.ips_tried,
        ?decision,
        "[重试决策]"
    );
}

pub fn pool_refreshed(endpoints: &[EndpointDescriptor], generation: u64) {
    let mut list = String::new();
    for ep in endpoints {
        list.push_str(&ep.key);
        list.push('\n');
    }
    tracing::info!(
        "\n===================== 代理池刷新 ======================\n[第 {generation} 次刷新] 共 {} 个代理\n{}=========================================================",
        endpoints.len(),
        list,
    );
}

/// 按字符数截断，超出部分以 `...[TRUNCATED]` 结尾。
pub fn truncate_text_for_log(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push_str("...[TRUNCATED]");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_names_and_aliases() {
        assert_eq!(LogLevel::parse("LOW"), LogLevel::Low);
        assert_eq!(LogLevel::parse(" attempt "), LogLevel::Medium);
        assert_eq!(LogLevel::parse("all"), LogLevel::High);
        assert_eq!(LogLevel::parse("nonsense"), LogLevel::Off);
    }

    #[test]
    fn levels_are_cumulative() {
        assert!(!LogLevel::Off.outcome_enabled());
        assert!(LogLevel::Low.outcome_enabled());
        assert!(!LogLevel::Low.attempt_enabled());
        assert!(LogLevel::High.attempt_enabled());
        assert!(LogLevel::High.verbose_enabled());
    }

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(truncate_text_for_log("代理池", 5), "代理池");
        assert_eq!(truncate_text_for_log("代理池刷新", 2), "代理...[TRUNCATED]");
    }
}
