//! Shared utilities.

pub mod cancel;
pub mod clock;
pub mod telemetry;

pub use cancel::CancelScope;
pub use clock::now_ms;
pub use telemetry::init_tracing;
