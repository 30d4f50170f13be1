use super::policy::{Decision, RetryContext, RetryPolicy};
use crate::error::BalancerError;
use crate::logging::{self, LogLevel};
use crate::pool::EndpointDescriptor;
use std::future::Future;
use std::sync::Arc;

/// 一次选择的结果：选中的代理，以及选择时代理池的大小。
#[derive(Debug, Clone)]
pub struct Selection {
    pub endpoint: EndpointDescriptor,
    pub pool_size: usize,
}

enum Step {
    Select,
    Attempt { selection: Selection, reused: bool },
    Decide {
        error: BalancerError,
        selection: Option<Selection>,
    },
}

/// 一次逻辑请求的重试循环。
///
/// 循环本身不设上限，何时停止完全由策略决定；唯一的例外是 `consume` 时发现
/// 的配额耗尽：它不交给策略，而是直接重新选择，连续次数不超过选择时的池大小；
/// 超出后以 `NoEndpointsAvailable` 交给策略。
pub struct RetryController {
    policy: Arc<dyn RetryPolicy>,
    log_level: LogLevel,
}

impl RetryController {
    pub fn new(policy: Arc<dyn RetryPolicy>) -> Self {
        Self {
            policy,
            log_level: LogLevel::Off,
        }
    }

    pub fn with_log_level(mut self, log_level: LogLevel) -> Self {
        self.log_level = log_level;
        self
    }

    /// `select` 选出下一个代理；`attempt` 用给定代理执行一次尝试。
    pub async fn run<T, S, SFut, A, AFut>(
        &self,
        mut select: S,
        mut attempt: A,
    ) -> Result<T, BalancerError>
    where
        S: FnMut() -> SFut,
        SFut: Future<Output = Result<Selection, BalancerError>>,
        A: FnMut(EndpointDescriptor, RetryContext) -> AFut,
        AFut: Future<Output = Result<T, BalancerError>>,
    {
        let mut ctx = RetryContext::new();
        let mut quota_skips = 0usize;
        let mut step = Step::Select;

        loop {
            step = match step {
                Step::Select => match select().await {
                    Ok(selection) => Step::Attempt {
                        selection,
                        reused: false,
                    },
                    Err(error) => Step::Decide {
                        error,
                        selection: None,
                    },
                },

                Step::Attempt { selection, reused } => {
                    match attempt(selection.endpoint.clone(), ctx).await {
                        Ok(v) => return Ok(v),
                        Err(error)
                            if error.is_quota_exhausted() && quota_skips < selection.pool_size =>
                        {
                            quota_skips += 1;
                            if reused {
                                // 同代理重试落空：改用新代理，按换代理计数。
                                ctx.times_this_ip_retried = 0;
                                ctx.ips_tried += 1;
                            }
                            tracing::debug!(
                                endpoint = %selection.endpoint,
                                quota_skips = quota_skips,
                                "代理配额已耗尽，重新选择"
                            );
                            Step::Select
                        }
                        Err(error) => {
                            quota_skips = 0;
                            // 配额耗尽只在选择内部流转，交给策略前改为“无可用代理”。
                            let error = if error.is_quota_exhausted() {
                                BalancerError::NoEndpointsAvailable
                            } else {
                                error
                            };
                            Step::Decide {
                                error,
                                selection: Some(selection),
                            }
                        }
                    }
                }

                Step::Decide { error, selection } => {
                    let decision = self
                        .policy
                        .decide(&error, &ctx)
                        .map_err(|e| BalancerError::Policy(format!("{e:#}")))?;
                    // 没有可复用的代理时，同代理重试退化为换代理重试。
                    let decision = match (decision, &selection) {
                        (Decision::RetrySameEndpoint, None) => Decision::RetryNextEndpoint,
                        (d, _) => d,
                    };
                    if self.log_level.verbose_enabled() {
                        logging::retry_decision(&error, &ctx, decision);
                    }
                    ctx.advance(decision);

                    match (decision, selection) {
                        (Decision::Abort, _) => return Err(error),
                        (Decision::RetrySameEndpoint, Some(selection)) => Step::Attempt {
                            selection,
                            reused: true,
                        },
                        _ => Step::Select,
                    }
                }
            };
        }
    }
}
