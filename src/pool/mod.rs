//! 代理池（Endpoint Pool）模块。
//!
//! 负责从代理源拉取代理列表、规范化为 [`EndpointDescriptor`]，并按 TTL 缓存；
//! 并发调用方共享同一次刷新。

mod manager;
mod source;
mod types;

pub use manager::EndpointPool;
pub use source::{EndpointSource, FnSource, HttpJsonSource, StaticSource, source_fn};
pub use types::{EndpointDescriptor, PoolSnapshot, normalize_list};
