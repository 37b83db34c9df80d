//! Command and data TCP protocol servers: line-oriented configuration
//! commands, capture-data streaming, and the `*`
//! system commands, all built on the shared entity registry and capture
//! controller the binary crate assembles at startup.

mod command;
mod data;
mod error;
mod options;
mod system;

use std::sync::Arc;
use std::time::Duration;

use panda_capture::CaptureController;
use panda_entity::EntityRegistry;
use panda_hw::HardwareAccess;

pub use command::serve as serve_command;
pub use data::serve as serve_data;
pub use error::ProtoError;
pub use error::Result;
pub use options::parse as parse_data_options;
pub use options::DataOptions;

/// Everything a command or data connection thread needs, handed out as
/// one `Arc` per accepted connection.
pub struct Shared {
    pub registry: Arc<EntityRegistry>,
    pub hw: Arc<dyn HardwareAccess>,
    pub capture: Arc<CaptureController>,
    /// Data-socket write timeout: a stuck client is dropped rather
    /// than stalling the reader.
    pub write_timeout: Duration,
}
