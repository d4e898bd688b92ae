pub mod exchanges;
pub mod fetcher;
pub mod lifecycle;
pub mod maintenance;
pub mod pipeline;
pub mod proxy_pool;
pub mod settings;
pub mod sync;

pub use exchanges::{ClientFactory, HttpClientFactory};
pub use fetcher::{ResilientFetcher, RetryPolicy};
pub use lifecycle::{Scheduler, SchedulerHandle};
pub use pipeline::{PipelineOptions, RunReport, SignalPipeline};
pub use proxy_pool::{PoolReport, ProxyPool};
pub use settings::SettingsService;
pub use sync::PairSynchronizer;
