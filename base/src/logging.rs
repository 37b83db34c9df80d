//! Logging setup. The server uses the `log` facade throughout; the binary
//! crate is the only place that installs a concrete logger.

use log::LevelFilter;

/// Installs `env_logger` with a default level derived from `-v` count,
/// overridable by `RUST_LOG` as usual.
pub fn init(verbosity: u8) {
    let default_level = match verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(default_level);
    if let Ok(spec) = std::env::var("RUST_LOG") {
        builder.parse_filters(&spec);
    }
    // In test binaries a logger may already be installed by a previous test;
    // ignore the error rather than panicking the whole suite.
    let _ = builder.try_init();
}
