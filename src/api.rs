//! Everything that talks to the post API: the request model, the transport
//! seam, XML decoding, and the retrying page fetcher built on top of them.

pub mod client;
pub mod decode;
pub mod error;
pub mod metrics;
pub mod options;
pub mod post;
pub mod query;
mod retry;
pub mod transport;

pub use client::ApiClient;
pub use error::{is_decode_error, ApiError};
pub use metrics::ApiMetricsSnapshot;
pub use options::ApiClientOptions;
pub use post::{Post, PostPage};
pub use query::PostQuery;
pub use transport::{HttpTransport, PageTransport};
