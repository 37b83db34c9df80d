//! Persistence: replays a saved state file at startup,
//! then runs a background thread that re-dumps the full settable state
//! whenever it changes, plus the MAC address file loader.

mod error;
mod mac;
mod replay;
mod writer;

pub use error::PersistError;
pub use error::Result;
pub use mac::load_and_apply as load_mac_file;
pub use mac::MAC_ADDRESS_COUNT;
pub use replay::replay as replay_persistence_file;
pub use writer::generate_records;
pub use writer::run_persistence_thread;
