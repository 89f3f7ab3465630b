pub mod cancel;
pub mod metrics;
pub mod worker;

pub use metrics::METRICS;
pub use worker::{Worker, WorkerError, WorkerHandle};
