//! Logger setup for binaries and tests that want to see the crate's
//! `log` output.

/// Install a `simple_logger` that honours `RUST_LOG`.
///
/// Only the first call in a process installs a logger; later calls return
/// the `SetLoggerError` from `log`.
pub fn init_logger() -> Result<(), log::SetLoggerError> {
    simple_logger::SimpleLogger::new().env().init()
}
