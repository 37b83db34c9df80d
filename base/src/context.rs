//! Context-extension helper mirroring the C server's error-chaining
//! short-circuit operator: every layer that forwards an error can prepend
//! the location it was observed at without losing the original cause.

use anyhow::Context;
use anyhow::Result;

pub trait ResultExt<T> {
    /// Attach `file:line` plus a short human description to the error,
    /// matching the `ERR <message>` shape the command protocol reports.
    fn context_at(self, file: &'static str, line: u32, what: &str) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context_at(self, file: &'static str, line: u32, what: &str) -> Result<T> {
        self.with_context(|| format!("{what} ({file}:{line})"))
    }
}

#[macro_export]
macro_rules! ctx {
    ($result:expr, $what:expr) => {
        $crate::ResultExt::context_at($result, file!(), line!(), $what)
    };
}
