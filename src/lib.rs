pub mod balancer;
pub mod config;
pub mod error;
pub mod gate;
pub mod logging;
pub mod pool;
pub mod quota;
pub mod retry;
pub mod selector;
pub mod transport;
pub mod util;

pub use balancer::{Balancer, BalancerBuilder, BalancerOptions};
pub use error::{BalancerError, TransportKind};
pub use pool::{EndpointDescriptor, EndpointSource};
pub use quota::QuotaConfig;
pub use retry::{Decision, RetryContext, RetryPolicy};
pub use transport::{AgentFactory, RequestOptions, Requestor, Validator};
