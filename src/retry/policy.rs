use crate::error::BalancerError;

/// 一次失败之后的处理方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// 换一个代理重试。
    RetryNextEndpoint,
    /// 用同一个代理重试。
    RetrySameEndpoint,
    /// 放弃，把本次错误返回给调用方。
    Abort,
}

/// 一次逻辑请求（含其所有重试）的计数器。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryContext {
    /// 已发生的尝试次数 - 1。
    pub retry_count: u32,
    /// 对当前代理的连续重试次数，换代理时归零。
    pub times_this_ip_retried: u32,
    /// 已使用过的代理数，从 1 开始。
    pub ips_tried: u32,
}

impl RetryContext {
    pub fn new() -> Self {
        Self {
            retry_count: 0,
            times_this_ip_retried: 0,
            ips_tried: 1,
        }
    }

    /// 按决策推进计数器；`Abort` 不改变任何计数。
    pub fn advance(&mut self, decision: Decision) {
        match decision {
            Decision::RetryNextEndpoint => {
                self.retry_count += 1;
                self.times_this_ip_retried = 0;
                self.ips_tried += 1;
            }
            Decision::RetrySameEndpoint => {
                self.retry_count += 1;
                self.times_this_ip_retried += 1;
            }
            Decision::Abort => {}
        }
    }
}

impl Default for RetryContext {
    fn default() -> Self {
        Self::new()
    }
}

/// 重试策略。返回 Err 表示策略本身出错，请求以 `PolicyError` 失败。
pub trait RetryPolicy: Send + Sync {
    fn decide(&self, error: &BalancerError, ctx: &RetryContext) -> anyhow::Result<Decision>;
}

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// 默认策略：重试次数达到上限即放弃；只对连接/超时类失败换代理重试，
/// 校验失败等其它错误直接放弃。
#[derive(Debug, Clone, Copy)]
pub struct DefaultPolicy {
    max_retries: u32,
}

impl DefaultPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }
}

impl Default for DefaultPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl RetryPolicy for DefaultPolicy {
    fn decide(&self, error: &BalancerError, ctx: &RetryContext) -> anyhow::Result<Decision> {
        if ctx.retry_count >= self.max_retries {
            return Ok(Decision::Abort);
        }
        if error.is_transport_failure() {
            Ok(Decision::RetryNextEndpoint)
        } else {
            Ok(Decision::Abort)
        }
    }
}

/// 用闭包作为重试策略。
pub struct PolicyFn<F>(F);

pub fn policy_fn<F>(f: F) -> PolicyFn<F>
where
    F: Fn(&BalancerError, &RetryContext) -> anyhow::Result<Decision> + Send + Sync,
{
    PolicyFn(f)
}

impl<F> RetryPolicy for PolicyFn<F>
where
    F: Fn(&BalancerError, &RetryContext) -> anyhow::Result<Decision> + Send + Sync,
{
    fn decide(&self, error: &BalancerError, ctx: &RetryContext) -> anyhow::Result<Decision> {
        (self.0)(error, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportKind;

    #[test]
    fn advance_tracks_endpoint_changes() {
        let mut ctx = RetryContext::new();
        ctx.advance(Decision::RetrySameEndpoint);
        ctx.advance(Decision::RetrySameEndpoint);
        assert_eq!(
            ctx,
            RetryContext {
                retry_count: 2,
                times_this_ip_retried: 2,
                ips_tried: 1
            }
        );

        ctx.advance(Decision::RetryNextEndpoint);
        assert_eq!(
            ctx,
            RetryContext {
                retry_count: 3,
                times_this_ip_retried: 0,
                ips_tried: 2
            }
        );

        ctx.advance(Decision::Abort);
        assert_eq!(ctx.retry_count, 3);
    }

    #[test]
    fn default_policy_retries_transport_failures_up_to_the_cap() {
        let policy = DefaultPolicy::default();
        let timeout = BalancerError::transport(TransportKind::Timeout, "deadline");
        let mut ctx = RetryContext::new();
        for _ in 0..3 {
            assert_eq!(
                policy.decide(&timeout, &ctx).unwrap(),
                Decision::RetryNextEndpoint
            );
            ctx.advance(Decision::RetryNextEndpoint);
        }
        assert_eq!(policy.decide(&timeout, &ctx).unwrap(), Decision::Abort);
    }

    #[test]
    fn default_policy_aborts_on_validation_failure() {
        let policy = DefaultPolicy::default();
        let err = BalancerError::validation("Invalid Response");
        assert_eq!(
            policy.decide(&err, &RetryContext::new()).unwrap(),
            Decision::Abort
        );
        assert_eq!(
            policy
                .decide(&BalancerError::EmptyPool, &RetryContext::new())
                .unwrap(),
            Decision::Abort
        );
    }
}
