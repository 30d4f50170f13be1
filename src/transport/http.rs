use super::{AgentFactory, RequestOptions, Requestor, Validator};
use crate::error::BalancerError;
use crate::pool::EndpointDescriptor;
use futures::future::BoxFuture;
use moka::sync::Cache;
use std::time::Duration;

const DEFAULT_AGENT_CACHE_CAPACITY: u64 = 1_024;
const DEFAULT_AGENT_IDLE: Duration = Duration::from_secs(600);

/// agent 即一个经由该代理转发的 `reqwest::Client`。
///
/// 同一代理、同一超时的 client 会被缓存复用（空闲一段时间后淘汰），
/// 轮转的代理池不必每次尝试都重建连接池。
#[derive(Clone, Debug)]
pub struct ReqwestAgentFactory {
    clients: Cache<String, reqwest::Client>,
}

impl ReqwestAgentFactory {
    pub fn new() -> Self {
        Self::with_cache(DEFAULT_AGENT_CACHE_CAPACITY, DEFAULT_AGENT_IDLE)
    }

    pub fn with_cache(capacity: u64, time_to_idle: Duration) -> Self {
        Self {
            clients: Cache::builder()
                .max_capacity(capacity)
                .time_to_idle(time_to_idle)
                .build(),
        }
    }

    pub fn cached_agents(&self) -> u64 {
        self.clients.run_pending_tasks();
        self.clients.entry_count()
    }

    fn build_client(
        endpoint: &EndpointDescriptor,
        timeout: Duration,
    ) -> Result<reqwest::Client, BalancerError> {
        let proxy = reqwest::Proxy::all(endpoint.key.as_str())
            .map_err(|e| BalancerError::Agent(format!("{}: {e:#}", endpoint.key)))?;
        let mut builder = reqwest::Client::builder()
            .proxy(proxy)
            .pool_idle_timeout(Duration::from_secs(90));
        if !timeout.is_zero() {
            builder = builder.connect_timeout(timeout);
        }
        builder
            .build()
            .map_err(|e| BalancerError::Agent(format!("{}: {e:#}", endpoint.key)))
    }
}

impl Default for ReqwestAgentFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentFactory for ReqwestAgentFactory {
    type Agent = reqwest::Client;

    fn make_agent(
        &self,
        endpoint: &EndpointDescriptor,
        timeout: Duration,
    ) -> Result<reqwest::Client, BalancerError> {
        let cache_key = format!("{}|{}", endpoint.key, timeout.as_millis());
        if let Some(client) = self.clients.get(&cache_key) {
            return Ok(client);
        }
        let client = Self::build_client(endpoint, timeout)?;
        self.clients.insert(cache_key, client.clone());
        Ok(client)
    }
}

/// 用 agent 发送请求；请求级超时即单次尝试超时。
#[derive(Clone, Copy, Debug, Default)]
pub struct ReqwestRequestor;

impl Requestor<reqwest::Client> for ReqwestRequestor {
    type Response = reqwest::Response;

    fn request<'a>(
        &'a self,
        url: &'a str,
        agent: &'a reqwest::Client,
        options: &'a RequestOptions,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<reqwest::Response, BalancerError>> {
        Box::pin(async move {
            let mut req = agent
                .request(options.method.clone(), url)
                .headers(options.headers.clone());
            if !timeout.is_zero() {
                req = req.timeout(timeout);
            }
            if let Some(body) = &options.body {
                req = req.body(body.clone());
            }
            Ok(req.send().await?)
        })
    }
}

/// 非 2xx 响应视为校验失败。
#[derive(Clone, Copy, Debug, Default)]
pub struct StatusValidator;

impl StatusValidator {
    pub fn check(status: reqwest::StatusCode) -> Result<(), BalancerError> {
        if status.is_success() {
            Ok(())
        } else {
            Err(BalancerError::validation("Invalid Response"))
        }
    }
}

impl Validator<reqwest::Response> for StatusValidator {
    fn validate(&self, response: &reqwest::Response) -> Result<(), BalancerError> {
        Self::check(response.status())
    }
}
