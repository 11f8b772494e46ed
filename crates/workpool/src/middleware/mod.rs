//! Ready-made interceptors

mod logging;
mod recovery;

pub use logging::LoggingInterceptor;
pub use recovery::{PanicHandler, RecoveryInterceptor};
