mod error;
pub mod dispatcher;
pub mod migration;
pub mod providers;
pub mod traits;
mod wait;

#[cfg(any(test, feature = "testing"))]
pub mod mocks;

pub use error::{OperationError, Result};
