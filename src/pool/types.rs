use crate::error::BalancerError;
use chrono::{DateTime, Utc};
use sonic_rs::{JsonContainerTrait, JsonValueTrait, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;

/// 一个上游代理节点。
///
/// `key` 是规范化后的代理地址，用于配额分桶、去重与日志；
/// `meta` 原样保留代理源返回的记录，调用方可自行读取其中的字段。
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointDescriptor {
    pub key: String,
    pub meta: Arc<Value>,
}

impl EndpointDescriptor {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            meta: Arc::new(Value::new()),
        }
    }

    /// 把代理源返回的单条记录规范化。无法识别时返回 None。
    ///
    /// - 字符串：去除首尾空白，缺少 scheme 时补 `http://`
    /// - 对象：优先取 `url` 字段；否则由 `protocol`/`scheme`、`host`/`ip`、`port`
    ///   （以及可选的 `username`/`password`）拼出地址
    pub fn from_value(v: &Value) -> Option<Self> {
        if let Some(s) = v.as_str() {
            let key = normalize_address(s)?;
            return Some(Self {
                key,
                meta: Arc::new(v.clone()),
            });
        }

        let obj = v.as_object()?;
        if let Some(url) = obj.get(&"url").and_then(|u| u.as_str())
            && let Some(key) = normalize_address(url)
        {
            return Some(Self {
                key,
                meta: Arc::new(v.clone()),
            });
        }

        let host = obj
            .get(&"host")
            .or_else(|| obj.get(&"ip"))
            .and_then(|h| h.as_str())
            .map(str::trim)
            .filter(|h| !h.is_empty())?;
        let port = obj.get(&"port").and_then(|p| {
            p.as_u64()
                .and_then(|n| u16::try_from(n).ok())
                .or_else(|| p.as_str().and_then(|s| s.trim().parse::<u16>().ok()))
        })?;
        let scheme = obj
            .get(&"protocol")
            .or_else(|| obj.get(&"scheme"))
            .and_then(|s| s.as_str())
            .map(|s| s.trim().trim_end_matches("://").to_lowercase())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "http".to_string());

        let user = obj.get(&"username").and_then(|u| u.as_str()).unwrap_or("");
        let key = if user.is_empty() {
            format!("{scheme}://{host}:{port}")
        } else {
            let pass = obj.get(&"password").and_then(|p| p.as_str()).unwrap_or("");
            format!("{scheme}://{user}:{pass}@{host}:{port}")
        };

        Some(Self {
            key,
            meta: Arc::new(v.clone()),
        })
    }
}

impl fmt::Display for EndpointDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

fn normalize_address(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if s.contains("://") {
        Some(s.to_string())
    } else {
        Some(format!("http://{s}"))
    }
}

/// 把代理源的返回值规范化为代理列表。
///
/// 返回值必须是数组；无法识别的条目会被跳过，重复的 key 只保留第一次出现的。
pub fn normalize_list(value: &Value) -> Result<Vec<EndpointDescriptor>, BalancerError> {
    let Some(arr) = value.as_array() else {
        return Err(BalancerError::fetch_failed("代理源返回的不是列表"));
    };

    let mut seen: HashSet<String> = HashSet::with_capacity(arr.len());
    let mut out = Vec::with_capacity(arr.len());
    for item in arr.iter() {
        let Some(ep) = EndpointDescriptor::from_value(item) else {
            tracing::warn!(entry = %item, "无法识别的代理条目，已跳过");
            continue;
        };
        if !seen.insert(ep.key.clone()) {
            continue;
        }
        out.push(ep);
    }
    Ok(out)
}

/// 代理池在某一时刻的完整快照；整体替换，从不原地修改。
#[derive(Debug, Clone, Default)]
pub struct PoolSnapshot {
    pub endpoints: Arc<Vec<EndpointDescriptor>>,
    /// 最近一次刷新（无论成功与否）的单调时间；None 表示从未刷新。
    pub fetched_at: Option<Instant>,
    /// 最近一次刷新的墙钟时间，仅用于展示/日志。
    pub refreshed_at: Option<DateTime<Utc>>,
    /// 累计成功刷新次数。
    pub generation: u64,
}

impl PoolSnapshot {
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }
}
