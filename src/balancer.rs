//! 组合根：把代理池、选择器、配额、发送闸门与重试循环组装到 `request(url, options)` 上。

use crate::config::Config;
use crate::error::{BalancerError, TransportKind};
use crate::gate::DispatchGate;
use crate::logging::{self, LogLevel};
use crate::pool::{EndpointDescriptor, EndpointPool, EndpointSource, PoolSnapshot};
use crate::quota::{QuotaConfig, QuotaTracker};
use crate::retry::{
    DEFAULT_MAX_RETRIES, DefaultPolicy, RetryContext, RetryController, RetryPolicy, Selection,
};
use crate::selector::{EndpointSelector, ExhaustedHook};
use crate::transport::{
    AcceptAll, AgentFactory, ReqwestAgentFactory, ReqwestRequestor, RequestOptions, Requestor,
    StatusValidator, Validator,
};
use crate::util::id;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;

#[derive(Debug, Clone)]
pub struct BalancerOptions {
    pub pool_ttl: Duration,
    /// None 表示不限制并发。
    pub max_concurrent: Option<usize>,
    pub min_interval: Duration,
    /// 单次尝试超时；为 0 时不设超时。
    pub timeout: Duration,
    /// 构建 agent 时使用的代理连接超时。
    pub proxy_timeout: Duration,
    /// None 表示不做配额限制，选择退化为纯轮询。
    pub quota: Option<QuotaConfig>,
    pub shuffle: bool,
    /// 默认策略的重试上限（自定义策略时不生效）。
    pub max_retries: u32,
    pub log_level: LogLevel,
}

impl Default for BalancerOptions {
    fn default() -> Self {
        Self {
            pool_ttl: Duration::from_secs(60),
            max_concurrent: Some(15),
            min_interval: Duration::from_millis(100),
            timeout: Duration::from_secs(3),
            proxy_timeout: Duration::from_secs(2),
            quota: None,
            shuffle: false,
            max_retries: DEFAULT_MAX_RETRIES,
            log_level: LogLevel::Off,
        }
    }
}

impl BalancerOptions {
    pub fn from_config(cfg: &Config) -> Result<Self, BalancerError> {
        let quota = if cfg.quota_points > 0 {
            let window = Duration::from_millis(cfg.quota_window_ms);
            Some(QuotaConfig {
                points: cfg.quota_points,
                window,
                block: cfg
                    .quota_block_ms
                    .map(Duration::from_millis)
                    .unwrap_or(window),
            })
        } else {
            None
        };

        let opts = Self {
            pool_ttl: Duration::from_millis(cfg.pool_ttl_ms),
            max_concurrent: (cfg.max_concurrent > 0).then_some(cfg.max_concurrent),
            min_interval: Duration::from_millis(cfg.min_time_ms),
            timeout: Duration::from_millis(cfg.timeout_ms),
            proxy_timeout: Duration::from_millis(cfg.proxy_timeout_ms),
            quota,
            shuffle: cfg.shuffle,
            max_retries: cfg.max_retries,
            log_level: cfg.log_level(),
        };
        opts.validate()?;
        Ok(opts)
    }

    pub fn validate(&self) -> Result<(), BalancerError> {
        if let Some(quota) = &self.quota {
            quota.validate()?;
        }
        Ok(())
    }
}

pub struct BalancerBuilder<F, Q>
where
    F: AgentFactory,
    Q: Requestor<F::Agent>,
{
    agent_factory: F,
    requestor: Q,
    options: BalancerOptions,
    source: Option<Arc<dyn EndpointSource>>,
    validator: Option<Arc<dyn Validator<Q::Response>>>,
    policy: Option<Arc<dyn RetryPolicy>>,
    on_exhausted: Option<ExhaustedHook>,
}

impl<F, Q> BalancerBuilder<F, Q>
where
    F: AgentFactory,
    Q: Requestor<F::Agent>,
{
    pub fn options(mut self, options: BalancerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn source(mut self, source: Arc<dyn EndpointSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn validator(mut self, validator: impl Validator<Q::Response> + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.policy = Some(Arc::new(policy));
        self
    }

    /// 所有代理都处于配额限制时的通知（例如触发一次带外刷新）。
    pub fn on_exhausted(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_exhausted = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> Result<Balancer<F, Q>, BalancerError> {
        let Some(source) = self.source else {
            return Err(BalancerError::config("未配置代理源"));
        };
        self.options.validate()?;
        let opts = self.options;

        let quota = opts.quota.map(|cfg| Arc::new(QuotaTracker::new(cfg)));
        let policy: Arc<dyn RetryPolicy> = match self.policy {
            Some(policy) => policy,
            None => Arc::new(DefaultPolicy::new(opts.max_retries)),
        };
        let validator: Arc<dyn Validator<Q::Response>> = match self.validator {
            Some(validator) => validator,
            None => Arc::new(AcceptAll),
        };

        Ok(Balancer {
            pool: EndpointPool::new(source, opts.pool_ttl, opts.shuffle)
                .with_log_level(opts.log_level),
            selector: EndpointSelector::new(quota.clone(), self.on_exhausted),
            gate: DispatchGate::new(opts.max_concurrent, opts.min_interval),
            retry: RetryController::new(policy).with_log_level(opts.log_level),
            quota,
            agent_factory: self.agent_factory,
            requestor: self.requestor,
            validator,
            options: opts,
        })
    }
}

/// 出站请求负载均衡器。
///
/// 所有共享状态（代理池快照、轮转游标、配额、闸门）都归这一个实例所有，
/// 多个并发 `request` 共享它们。
pub struct Balancer<F, Q>
where
    F: AgentFactory,
    Q: Requestor<F::Agent>,
{
    options: BalancerOptions,
    pool: EndpointPool,
    quota: Option<Arc<QuotaTracker>>,
    selector: EndpointSelector,
    gate: DispatchGate,
    retry: RetryController,
    agent_factory: F,
    requestor: Q,
    validator: Arc<dyn Validator<Q::Response>>,
}

impl Balancer<ReqwestAgentFactory, ReqwestRequestor> {
    /// reqwest 默认实现：按代理缓存 client，非 2xx 视为校验失败。
    pub fn reqwest(
        options: BalancerOptions,
        source: Arc<dyn EndpointSource>,
    ) -> Result<Self, BalancerError> {
        Self::builder(ReqwestAgentFactory::new(), ReqwestRequestor)
            .options(options)
            .source(source)
            .validator(StatusValidator)
            .build()
    }
}

impl<F, Q> Balancer<F, Q>
where
    F: AgentFactory,
    Q: Requestor<F::Agent>,
{
    pub fn builder(agent_factory: F, requestor: Q) -> BalancerBuilder<F, Q> {
        BalancerBuilder {
            agent_factory,
            requestor,
            options: BalancerOptions::default(),
            source: None,
            validator: None,
            policy: None,
            on_exhausted: None,
        }
    }

    pub fn options(&self) -> &BalancerOptions {
        &self.options
    }

    pub fn quota(&self) -> Option<&QuotaTracker> {
        self.quota.as_deref()
    }

    pub fn gate(&self) -> &DispatchGate {
        &self.gate
    }

    pub fn snapshot(&self) -> Arc<PoolSnapshot> {
        self.pool.snapshot()
    }

    /// 读取代理列表，必要时刷新。
    pub async fn endpoints(
        &self,
        force_refresh: bool,
    ) -> Result<Arc<Vec<EndpointDescriptor>>, BalancerError> {
        self.pool.get(force_refresh).await
    }

    pub async fn refresh(&self) -> Result<Arc<Vec<EndpointDescriptor>>, BalancerError> {
        self.pool.get(true).await
    }

    /// 只做选择，不发请求（会推进轮转游标）。
    pub async fn next_endpoint(&self) -> Result<EndpointDescriptor, BalancerError> {
        Ok(self.select().await?.endpoint)
    }

    /// 经由代理发送请求，按重试策略在失败时换代理或放弃。
    ///
    /// 返回最后一次尝试的结果，失败时即最后一次尝试的错误。
    pub async fn request(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<Q::Response, BalancerError> {
        let request_id = id::request_id();
        let span = tracing::info_span!("request", request_id = %request_id);
        let started = Instant::now();

        let this = self;
        let options = &options;
        let result = self
            .retry
            .run(
                move || async move { this.select().await },
                move |endpoint, ctx| async move { this.attempt(url, options, endpoint, ctx).await },
            )
            .instrument(span.clone())
            .await;

        let _enter = span.enter();
        let log_level = self.options.log_level;
        match result {
            Ok((response, ctx)) => {
                if log_level.outcome_enabled() {
                    logging::request_succeeded(url, started.elapsed(), &ctx);
                }
                Ok(response)
            }
            Err(e) => {
                if log_level.outcome_enabled() {
                    logging::request_failed(url, started.elapsed(), &e);
                }
                Err(e)
            }
        }
    }

    async fn select(&self) -> Result<Selection, BalancerError> {
        let endpoints = self.pool.get(false).await?;
        let endpoint = self.selector.next(&endpoints).await?;
        Ok(Selection {
            endpoint,
            pool_size: endpoints.len(),
        })
    }

    async fn attempt(
        &self,
        url: &str,
        options: &RequestOptions,
        endpoint: EndpointDescriptor,
        ctx: RetryContext,
    ) -> Result<(Q::Response, RetryContext), BalancerError> {
        let verbose = self.options.log_level.attempt_enabled();
        if verbose {
            logging::attempt_started(&endpoint, &ctx);
        }
        let started = Instant::now();
        let result = self.dispatch(url, options, &endpoint).await;
        if verbose && let Err(e) = &result {
            logging::attempt_failed(&endpoint, started.elapsed(), e);
        }
        result.map(|response| (response, ctx))
    }

    /// 一次尝试：构建 agent → 扣配额 → 过闸门发送（带超时）→ 校验。
    async fn dispatch(
        &self,
        url: &str,
        options: &RequestOptions,
        endpoint: &EndpointDescriptor,
    ) -> Result<Q::Response, BalancerError> {
        let agent = self
            .agent_factory
            .make_agent(endpoint, self.options.proxy_timeout)?;

        if let Some(quota) = &self.quota {
            quota.consume(&endpoint.key).await?;
        }

        let timeout = options.timeout.unwrap_or(self.options.timeout);
        let response = self
            .gate
            .admit(async {
                let call = self.requestor.request(url, &agent, options, timeout);
                if timeout.is_zero() {
                    return call.await;
                }
                match tokio::time::timeout(timeout, call).await {
                    Ok(result) => result,
                    Err(_) => Err(BalancerError::transport(
                        TransportKind::Timeout,
                        format!("单次尝试超时 ({}ms)", logging::format_duration_ms(timeout)),
                    )),
                }
            })
            .await?;

        self.validator.validate(&response)?;
        Ok(response)
    }
}
