//! 外部协作方的能力接口：构建 agent、发送请求、校验响应。
//!
//! 核心逻辑只依赖这三个 trait；[`http`] 子模块提供基于 reqwest 的默认实现。

pub mod http;

use crate::error::BalancerError;
use crate::pool::EndpointDescriptor;
use futures::future::BoxFuture;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;

pub use http::{ReqwestAgentFactory, ReqwestRequestor, StatusValidator};

/// 按代理构建传输句柄（agent），句柄原样交给 [`Requestor`]。
pub trait AgentFactory: Send + Sync {
    type Agent: Send + Sync + 'static;

    fn make_agent(
        &self,
        endpoint: &EndpointDescriptor,
        timeout: Duration,
    ) -> Result<Self::Agent, BalancerError>;
}

/// 通过 agent 发送一次请求。
///
/// 失败必须能区分为连接/超时类（`TransportKind::Connect | Timeout`）与其它，
/// 默认重试策略据此决定是否换代理。
pub trait Requestor<A>: Send + Sync {
    type Response: Send + 'static;

    fn request<'a>(
        &'a self,
        url: &'a str,
        agent: &'a A,
        options: &'a RequestOptions,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<Self::Response, BalancerError>>;
}

/// 校验响应。校验失败与传输失败一样交给重试策略处理。
pub trait Validator<R>: Send + Sync {
    fn validate(&self, response: &R) -> Result<(), BalancerError>;
}

/// 接受一切响应。
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl<R> Validator<R> for AcceptAll {
    fn validate(&self, _response: &R) -> Result<(), BalancerError> {
        Ok(())
    }
}

pub struct ValidatorFn<F>(F);

pub fn validator_fn<R, F>(f: F) -> ValidatorFn<F>
where
    F: Fn(&R) -> Result<(), BalancerError> + Send + Sync,
{
    ValidatorFn(f)
}

impl<R, F> Validator<R> for ValidatorFn<F>
where
    F: Fn(&R) -> Result<(), BalancerError> + Send + Sync,
{
    fn validate(&self, response: &R) -> Result<(), BalancerError> {
        (self.0)(response)
    }
}

/// 透传给 requestor 的请求参数。
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    /// 覆盖本次调用的单次尝试超时。
    pub timeout: Option<Duration>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
        }
    }
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post(body: impl Into<Vec<u8>>) -> Self {
        Self {
            method: Method::POST,
            body: Some(body.into()),
            ..Self::default()
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
