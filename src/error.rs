use std::fmt;
use thiserror::Error;

/// 传输层失败的类别，默认重试策略据此判断是否换节点重试。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// 连接失败、请求发送失败、读取响应体失败等网络层错误。
    Connect,
    /// 单次尝试超时。
    Timeout,
    /// 其它无法归类的请求错误（例如请求构造失败）。
    Other,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connect => "connect",
            Self::Timeout => "timeout",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BalancerError {
    #[error("获取代理列表失败: {0}")]
    Source(String),

    #[error("Empty proxy list")]
    EmptyPool,

    #[error("代理配额已耗尽: {key}")]
    QuotaExhausted { key: String },

    #[error("没有可用的代理（全部处于配额限制中）")]
    NoEndpointsAvailable,

    #[error("请求失败 ({kind}): {message}")]
    Transport { kind: TransportKind, message: String },

    #[error("响应校验失败: {0}")]
    Validation(String),

    #[error("重试策略执行失败: {0}")]
    Policy(String),

    #[error("构建代理 agent 失败: {0}")]
    Agent(String),

    #[error("配置错误: {0}")]
    Config(String),
}

impl BalancerError {
    pub fn fetch_failed(message: impl Into<String>) -> Self {
        Self::Source(message.into())
    }

    pub fn transport(kind: TransportKind, message: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// 是否为连接/超时类失败（默认策略只对这类错误换节点重试）。
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            Self::Transport {
                kind: TransportKind::Connect | TransportKind::Timeout,
                ..
            }
        )
    }

    pub fn is_quota_exhausted(&self) -> bool {
        matches!(self, Self::QuotaExhausted { .. })
    }

    pub fn transport_kind(&self) -> Option<TransportKind> {
        match self {
            Self::Transport { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for BalancerError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportKind::Timeout
        } else if err.is_connect() || err.is_request() || err.is_body() {
            TransportKind::Connect
        } else {
            TransportKind::Other
        };
        Self::Transport {
            kind,
            message: format!("{err:#}"),
        }
    }
}
