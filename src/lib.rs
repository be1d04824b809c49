pub mod api;
pub mod processor;
pub mod runtime;

pub use api::{
    is_decode_error, ApiClient, ApiClientOptions, ApiError, ApiMetricsSnapshot, HttpTransport,
    PageTransport, Post, PostPage, PostQuery,
};
pub use processor::cache::{CacheEntry, CacheLookup, CacheMiss, QueryCache, QueryKey};
pub use processor::max_id::MaxIdTracker;
pub use processor::scheduler::{RangeScheduler, ScheduleError, ScheduleRequest};
pub use processor::stream::PostStream;
pub use processor::viewer::{GetAll, Posts, Viewer};
pub use runtime::config::{ViewerConfig, ViewerConfigBuilder, ViewerConfigParams};
pub use runtime::supervisor::{TaskFailure, TaskSupervisor};
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
