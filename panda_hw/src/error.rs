use remain::sorted;
use thiserror::Error;

#[sorted]
#[derive(Error, Debug)]
pub enum HwError {
    #[error("capture completion read failed: {0}")]
    CompletionFailed(std::io::Error),
    #[error("ioctl {0} failed: {1}")]
    Ioctl(&'static str, std::io::Error),
    #[error("register block base mismatch for {block:?}: expected {expected:#x}, found {found:#x}")]
    NamedRegisterBaseMismatch { block: String, expected: u32, found: u32 },
    #[error("missing required named register {0:?}")]
    NamedRegisterMissing(&'static str),
    #[error("{0}")]
    Open(std::io::Error),
    #[error("table write exceeds maximum length {max} (got {len})")]
    TableTooLong { len: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, HwError>;
