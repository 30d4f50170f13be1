use figment::Figment;
use figment::providers::Env;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_POOL_TTL_MS: u64 = 60_000;
const DEFAULT_MAX_CONCURRENT: usize = 15;
const DEFAULT_MIN_TIME_MS: u64 = 100;
const DEFAULT_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_PROXY_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_QUOTA_WINDOW_MS: u64 = 60_000;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_TARGET_URL: &str = "https://ipv4.icanhazip.com";
const DEFAULT_REQUESTS: usize = 100;

#[derive(Debug, Clone)]
pub struct Config {
    pub pool_ttl_ms: u64,
    /// 0 表示不限制并发。
    pub max_concurrent: usize,
    pub min_time_ms: u64,
    pub timeout_ms: u64,
    pub proxy_timeout_ms: u64,

    /// 0 表示不启用配额。
    pub quota_points: u32,
    pub quota_window_ms: u64,
    /// 未配置时与窗口等长。
    pub quota_block_ms: Option<u64>,

    pub shuffle: bool,
    pub max_retries: u32,

    pub proxy_list: String,
    pub proxy_source_url: String,
    pub proxy_min_score: Option<f64>,

    pub target_url: String,
    pub requests: usize,

    pub debug: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawEnv {
    #[serde(alias = "POOL_TTL")]
    pool_ttl: Option<u64>,
    #[serde(alias = "MAX_CONCURRENT")]
    max_concurrent: Option<usize>,
    #[serde(alias = "MIN_TIME")]
    min_time: Option<u64>,
    #[serde(alias = "TIMEOUT")]
    timeout: Option<u64>,
    #[serde(alias = "PROXY_TIMEOUT")]
    proxy_timeout: Option<u64>,

    #[serde(alias = "QUOTA_POINTS")]
    quota_points: Option<u32>,
    #[serde(alias = "QUOTA_WINDOW")]
    quota_window: Option<u64>,
    #[serde(alias = "QUOTA_BLOCK")]
    quota_block: Option<u64>,

    #[serde(alias = "SHUFFLE")]
    shuffle: Option<bool>,
    #[serde(alias = "MAX_RETRIES")]
    max_retries: Option<u32>,

    #[serde(alias = "PROXY_LIST")]
    proxy_list: Option<String>,
    #[serde(alias = "PROXY_SOURCE_URL")]
    proxy_source_url: Option<String>,
    #[serde(alias = "PROXY_MIN_SCORE")]
    proxy_min_score: Option<f64>,

    #[serde(alias = "TARGET_URL")]
    target_url: Option<String>,
    #[serde(alias = "REQUESTS")]
    requests: Option<usize>,

    #[serde(alias = "DEBUG")]
    debug: Option<String>,
}

impl Config {
    pub fn load() -> Self {
        load_dotenv();

        let raw = Figment::from(Env::raw())
            .extract::<RawEnv>()
            .unwrap_or_default();

        let mut cfg = Self::from_raw(raw);

        // 命令行覆盖：-debug <level>
        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            if arg == "-debug"
                && let Some(v) = args.next()
            {
                cfg.debug = v;
            }
        }

        cfg
    }

    fn from_raw(raw: RawEnv) -> Self {
        Self {
            pool_ttl_ms: raw.pool_ttl.unwrap_or(DEFAULT_POOL_TTL_MS),
            max_concurrent: raw.max_concurrent.unwrap_or(DEFAULT_MAX_CONCURRENT),
            min_time_ms: raw.min_time.unwrap_or(DEFAULT_MIN_TIME_MS),
            timeout_ms: raw.timeout.unwrap_or(DEFAULT_TIMEOUT_MS),
            proxy_timeout_ms: raw.proxy_timeout.unwrap_or(DEFAULT_PROXY_TIMEOUT_MS),
            quota_points: raw.quota_points.unwrap_or(0),
            quota_window_ms: raw.quota_window.unwrap_or(DEFAULT_QUOTA_WINDOW_MS),
            quota_block_ms: raw.quota_block,
            shuffle: raw.shuffle.unwrap_or(false),
            max_retries: raw.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            proxy_list: raw.proxy_list.unwrap_or_default(),
            proxy_source_url: raw.proxy_source_url.unwrap_or_default(),
            proxy_min_score: raw.proxy_min_score,
            target_url: raw
                .target_url
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_TARGET_URL.to_string()),
            requests: raw.requests.unwrap_or(DEFAULT_REQUESTS),
            debug: raw.debug.unwrap_or_else(|| "off".to_string()),
        }
    }

    pub fn log_level(&self) -> crate::logging::LogLevel {
        crate::logging::LogLevel::parse(&self.debug)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_raw(RawEnv::default())
    }
}

fn load_dotenv() {
    let Some(path) = find_dotenv_path() else {
        return;
    };
    let Ok(content) = std::fs::read_to_string(&path) else {
        return;
    };

    for line in content.lines() {
        let Some((key, value)) = parse_dotenv_line(line) else {
            continue;
        };
        // 已由进程环境显式设置的变量优先。
        if std::env::var_os(&key).is_some() {
            continue;
        }
        // Rust 2024：set_var 为 unsafe。这里只在启动阶段、其它线程读取环境变量之前调用。
        unsafe {
            std::env::set_var(key, value);
        }
    }
}

/// 从当前目录向上寻找 `.env`，遇到 Cargo.toml 或 .git 所在目录即停止。
fn find_dotenv_path() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    let mut dir: &Path = cwd.as_path();

    loop {
        let candidate = dir.join(".env");
        if candidate.is_file() {
            return Some(candidate);
        }
        if dir.join("Cargo.toml").is_file() || dir.join(".git").is_dir() {
            return None;
        }
        dir = dir.parent()?;
    }
}

fn parse_dotenv_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let line = line.strip_prefix("export ").map_or(line, str::trim_start);

    let (key, raw) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }

    let raw = raw.trim();
    for quote in ['"', '\''] {
        if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
            return Some((key.to_string(), raw[1..raw.len() - 1].to_string()));
        }
    }
    Some((key.to_string(), strip_inline_comment(raw).to_string()))
}

/// 去掉行尾注释：`#` 位于开头或前面是空白时才视为注释。
fn strip_inline_comment(value: &str) -> &str {
    let bytes = value.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'#' && (i == 0 || bytes[i - 1] == b' ' || bytes[i - 1] == b'\t') {
            return value[..i].trim_end();
        }
    }
    value
}
