pub mod backoff;
pub mod clock;
pub mod config;
pub mod error;
pub mod health;
pub mod pipeline;
pub mod prepare;
pub mod rate_limiter;
pub mod registry;
pub mod relay;
pub mod service;
pub mod signing;
pub mod types;

pub use backoff::Backoff;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::*;
pub use error::*;
pub use health::{HealthPolicy, HealthProbe, HealthProber, RpcHealthProber, process_health_checks};
pub use pipeline::BundlePipeline;
pub use prepare::{BundleSource, HttpBundleSource, PrepareBundlesResponse, PrepareRequest};
pub use rate_limiter::RateLimiter;
pub use registry::{EndpointConnection, EndpointRegistry};
pub use relay::{JitoRelayClient, RelayClient};
pub use service::RelayerService;
pub use signing::{TxEncoding, complete_bundle_signing};
pub use types::*;
