use std::io::Write;

use flexi_logger::{DeferredNow, Logger, Record};

use crate::CliError;

/// Logs go to stderr; stdout carries replies only.
pub fn init() -> Result<(), CliError> {
    Logger::try_with_env_or_str("warn")?
        .format(cli_format)
        .log_to_stderr()
        .start()?;

    Ok(())
}

fn cli_format(
    w: &mut dyn Write,
    _now: &mut DeferredNow,
    record: &Record,
) -> Result<(), std::io::Error> {
    write!(w, "{}: {}", record.level(), record.args())
}
