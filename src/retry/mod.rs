//! 重试：策略决定“换代理 / 同代理 / 放弃”，控制器把一次逻辑请求展开为显式循环。

mod controller;
mod policy;

pub use controller::{RetryController, Selection};
pub use policy::{
    DEFAULT_MAX_RETRIES, Decision, DefaultPolicy, PolicyFn, RetryContext, RetryPolicy, policy_fn,
};
