//! Small system utilities shared by every crate in the workspace: logging
//! setup, a poison-proof mutex, a shutdown flag and an error-context helper.

mod context;
mod shutdown;
mod sync;

pub mod logging;

pub use context::ResultExt;
pub use shutdown::ShutdownFlag;
pub use sync::Mutex;
pub use sync::MutexGuard;

pub use log::debug;
pub use log::error;
pub use log::info;
pub use log::trace;
pub use log::warn;
