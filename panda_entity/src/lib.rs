//! Live entity model: combines the three `panda_parser` startup databases
//! and a `panda_hw::HardwareAccess` implementation into the block/field
//! tree the command and capture servers operate on.

mod block;
mod change;
mod error;
mod field;
mod mux;
mod registry;
mod table;

pub use block::Block;
pub use change::ChangeGroup;
pub use change::ChangeIndex;
pub use change::ConnectionChangeState;
pub use error::EntityError;
pub use error::Result;
pub use field::Class;
pub use field::ExtOutKind;
pub use field::Field;
pub use mux::BusState;
pub use mux::CaptureCapability;
pub use mux::CaptureMode;
pub use mux::CaptureOption;
pub use mux::MuxTable;
pub use mux::BIT_BUS_LEN;
pub use mux::POS_BUS_LEN;
pub use registry::run_bus_refresh_thread;
pub use registry::EntityRegistry;
pub use registry::RegisteredOutput;
pub use table::TableBinding;
pub use table::TableBuffer;
