//! Capture pipeline: plan construction, the ring buffer
//! the DMA reader fills, per-sample conversion, session header text, and
//! the `CaptureController`/DMA-reader thread that ties them together for
//! the process lifetime.

mod buffer;
mod convert;
mod error;
mod header;
mod plan;
mod session;

pub use buffer::CaptureBuffer;
pub use buffer::DEFAULT_BLOCK_COUNT;
pub use buffer::DEFAULT_BLOCK_SIZE;
pub use convert::convert_ascii_row;
pub use convert::convert_binary;
pub use convert::convert_values;
pub use convert::sample_bytes;
pub use convert::ConvertState;
pub use convert::FieldValue;
pub use convert::Process;
pub use error::CaptureError;
pub use error::Result;
pub use header::plain_text as header_plain_text;
pub use header::xml as header_xml;
pub use header::Format as HeaderFormat;
pub use plan::CapturePlan;
pub use plan::FieldCategory;
pub use plan::PlanField;
pub use session::run_dma_reader;
pub use session::CaptureController;
