//! Query processing on top of the API client: the concurrent page scheduler,
//! the single-flight query cache with its maintenance loop, and the viewer
//! that ties them together.

pub mod backoff;
pub mod cache;
pub mod maintenance;
pub mod max_id;
pub mod scheduler;
pub mod stream;
pub mod viewer;

#[cfg(test)]
mod testing;
