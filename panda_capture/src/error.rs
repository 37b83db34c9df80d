use remain::sorted;
use thiserror::Error;

#[sorted]
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture already in progress")]
    AlreadyArmed,
    #[error("capture bus overlap: {0} and {1} both claim {2}")]
    BusOverlap(String, String, String),
    #[error("hardware error: {0}")]
    Hardware(#[from] panda_hw::HwError),
    #[error("no outputs are registered for capture")]
    NothingRegistered,
    #[error("reader {0} fell behind the writer (overrun)")]
    Overrun(u64),
}

pub type Result<T> = std::result::Result<T, CaptureError>;
