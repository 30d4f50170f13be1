//! 代理源：负责拉取原始代理列表，规范化由 [`super::normalize_list`] 完成。

use anyhow::{Context, anyhow};
use futures::future::BoxFuture;
use sonic_rs::{JsonContainerTrait, JsonValueTrait, Value};
use std::future::Future;
use std::time::Duration;

const SOURCE_FETCH_TIMEOUT: Duration = Duration::from_secs(20);
const SCORE_FIELD: &str = "working_average";

/// 代理列表来源。返回值应为数组，元素可以是地址字符串或结构化记录。
pub trait EndpointSource: Send + Sync {
    fn fetch(&self) -> BoxFuture<'_, anyhow::Result<Value>>;
}

/// 固定列表。
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    addresses: Vec<String>,
}

impl StaticSource {
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            addresses: addresses.into_iter().map(Into::into).collect(),
        }
    }

    /// 解析逗号分隔的地址列表（`PROXY_LIST`）。
    pub fn parse(list: &str) -> Self {
        Self::new(
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

impl EndpointSource for StaticSource {
    fn fetch(&self) -> BoxFuture<'_, anyhow::Result<Value>> {
        let arr: Vec<Value> = self
            .addresses
            .iter()
            .map(|a| Value::from(a.as_str()))
            .collect();
        Box::pin(async move { Ok(Value::from(arr)) })
    }
}

/// 通过 HTTP 拉取 JSON 格式的代理列表。
#[derive(Debug, Clone)]
pub struct HttpJsonSource {
    http: reqwest::Client,
    url: String,
    score_threshold: Option<f64>,
}

impl HttpJsonSource {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(SOURCE_FETCH_TIMEOUT)
            .build()
            .context("初始化代理源 HTTP 客户端失败")?;
        Ok(Self {
            http,
            url: url.into(),
            score_threshold: None,
        })
    }

    /// 只保留 `working_average` 大于阈值的记录（缺少该字段的记录会被丢弃）。
    pub fn with_score_threshold(mut self, threshold: Option<f64>) -> Self {
        self.score_threshold = threshold;
        self
    }

    async fn fetch_json(&self) -> anyhow::Result<Value> {
        let resp = self
            .http
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("请求代理源失败: {}", self.url))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("代理源返回状态码 {status}"));
        }
        let bytes = resp.bytes().await.context("读取代理源响应失败")?;
        let value: Value = sonic_rs::from_slice(&bytes).context("解析代理源 JSON 失败")?;

        let Some(threshold) = self.score_threshold else {
            return Ok(value);
        };
        Ok(filter_by_score(&value, threshold))
    }
}

impl EndpointSource for HttpJsonSource {
    fn fetch(&self) -> BoxFuture<'_, anyhow::Result<Value>> {
        Box::pin(self.fetch_json())
    }
}

fn filter_by_score(value: &Value, threshold: f64) -> Value {
    // 非数组原样返回，由规范化阶段报错。
    let Some(arr) = value.as_array() else {
        return value.clone();
    };
    let kept: Vec<Value> = arr
        .iter()
        .filter(|item| {
            item.as_object()
                .and_then(|o| o.get(&SCORE_FIELD))
                .and_then(|s| s.as_f64())
                .is_some_and(|s| s > threshold)
        })
        .cloned()
        .collect();
    Value::from(kept)
}

/// 用异步闭包作为代理源。
pub struct FnSource<F>(F);

pub fn source_fn<F, Fut>(f: F) -> FnSource<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    FnSource(f)
}

impl<F, Fut> EndpointSource for FnSource<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    fn fetch(&self) -> BoxFuture<'_, anyhow::Result<Value>> {
        Box::pin((self.0)())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_source_yields_its_addresses() {
        let src = StaticSource::parse(" http://a:1, ,b:2 ");
        let v = src.fetch().await.unwrap();
        let addrs: Vec<&str> = v
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|a| a.as_str())
            .collect();
        assert_eq!(addrs, vec!["http://a:1", "b:2"]);
    }

    #[test]
    fn score_filter_keeps_only_records_above_threshold() {
        let v: Value = sonic_rs::from_str(
            r#"[
                {"ip": "1.1.1.1", "port": 80, "working_average": 95.0},
                {"ip": "2.2.2.2", "port": 80, "working_average": 70},
                {"ip": "3.3.3.3", "port": 80}
            ]"#,
        )
        .unwrap();
        let out = filter_by_score(&v, 70.0);
        let ips: Vec<&str> = out
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|item| item.as_object().and_then(|o| o.get(&"ip")))
            .filter_map(|ip| ip.as_str())
            .collect();
        assert_eq!(ips, vec!["1.1.1.1"]);
    }

    #[tokio::test]
    async fn closures_can_act_as_sources() {
        let src = source_fn(|| async { Ok(Value::from(vec![Value::from("http://x:1")])) });
        let v = src.fetch().await.unwrap();
        assert_eq!(v.as_array().map(|a| a.len()), Some(1));
    }
}
