//! 压测：并发发出 REQUESTS 个请求，经由代理池访问 TARGET_URL。

use anyhow::Context;
use proxy_balancer::config::Config;
use proxy_balancer::logging;
use proxy_balancer::pool::{EndpointSource, HttpJsonSource, StaticSource};
use proxy_balancer::transport::{ReqwestAgentFactory, ReqwestRequestor};
use proxy_balancer::{Balancer, BalancerOptions, RequestOptions};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

type HttpBalancer = Balancer<ReqwestAgentFactory, ReqwestRequestor>;

const BODY_LOG_CHARS: usize = 200;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::load();

    init_tracing();

    let source = build_source(&cfg)?;
    let options = BalancerOptions::from_config(&cfg).context("解析负载均衡配置失败")?;
    let balancer = Arc::new(Balancer::reqwest(options, source).context("初始化负载均衡器失败")?);

    tracing::info!("开始压测：{} 个请求 -> {}", cfg.requests, cfg.target_url);

    let tasks: Vec<_> = (0..cfg.requests)
        .map(|i| {
            let balancer = balancer.clone();
            let url = cfg.target_url.clone();
            tokio::spawn(async move { run_one(&balancer, &url, i).await })
        })
        .collect();

    let results = tokio::select! {
        results = futures::future::join_all(tasks) => results,
        _ = shutdown_signal() => return Ok(()),
    };

    let succeeded = results
        .iter()
        .filter(|r| matches!(r, Ok(true)))
        .count();
    tracing::info!(
        "压测结束：成功 {succeeded}，失败 {}",
        results.len() - succeeded
    );

    Ok(())
}

async fn run_one(balancer: &HttpBalancer, url: &str, index: usize) -> bool {
    match balancer.request(url, RequestOptions::get()).await {
        Ok(resp) => {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            tracing::info!(
                "completed: {index}, status: {status}, body: {}",
                logging::truncate_text_for_log(body.trim(), BODY_LOG_CHARS)
            );
            true
        }
        Err(e) => {
            tracing::warn!("failed: {index}, {e}");
            false
        }
    }
}

fn build_source(cfg: &Config) -> anyhow::Result<Arc<dyn EndpointSource>> {
    let url = cfg.proxy_source_url.trim();
    if !url.is_empty() {
        let source = HttpJsonSource::new(url)?.with_score_threshold(cfg.proxy_min_score);
        return Ok(Arc::new(source));
    }

    let list = StaticSource::parse(&cfg.proxy_list);
    if list.is_empty() {
        anyhow::bail!("未配置代理源：请设置 PROXY_SOURCE_URL 或 PROXY_LIST");
    }
    Ok(Arc::new(list))
}

fn init_tracing() {
    // 依赖库日志默认只保留 warn；本 crate 至少为 info，
    // 避免环境中预设的 RUST_LOG=warn 把压测结果过滤掉。
    // 逐请求的详细日志块由 DEBUG 等级单独控制。
    let env = std::env::var("RUST_LOG").unwrap_or_default();
    let env = env.trim();
    let filter = if env.is_empty() {
        EnvFilter::new("warn,proxy_balancer=info")
    } else if env.contains("proxy_balancer") {
        EnvFilter::new(env)
    } else {
        EnvFilter::new(format!("{env},proxy_balancer=info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .try_init();
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::warn!("收到退出信号，中止压测");
}
