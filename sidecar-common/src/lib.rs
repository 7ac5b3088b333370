pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod probe;
pub mod readiness;
pub mod retry;
pub mod sdk;
pub mod shutdown;
