//! Stage Logging
//!
//! Bare stages have no firmware logger, so records are formatted into a
//! fixed stack buffer and written to whatever [`Console`] the board provides.
//! Stages hosted by UEFI pass [`FirmwareConsole`], which writes to the
//! firmware's text output.

use core::fmt::{self, Write};

use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::Once;

/// Longest formatted line; longer records are truncated.
pub const LINE_SIZE: usize = 256;

/// Byte sink for log lines.
pub trait Console: Sync {
    fn puts(&self, s: &str);
}

/// The UEFI text output of the running image.
///
/// Writes are dropped once boot services have exited.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirmwareConsole;

impl Console for FirmwareConsole {
    fn puts(&self, s: &str) {
        let Some(st) = uefi::table::system_table_raw() else {
            return;
        };
        // SAFETY: The table was registered by the entry point and stays valid
        // for the life of the image
        let st = unsafe { st.as_ref() };
        if st.boot_services.is_null() || st.stdout.is_null() {
            return;
        }
        uefi::system::with_stdout(|out| {
            let _ = out.write_str(s);
        });
    }
}

/// Stack buffer for formatting one log line
pub struct LineBuffer {
    data: [u8; LINE_SIZE],
    len: usize,
}

impl LineBuffer {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            data: [0u8; LINE_SIZE],
            len: 0,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        // Truncation may split a character; keep the valid prefix
        match core::str::from_utf8(&self.data[..self.len]) {
            Ok(s) => s,
            Err(e) => core::str::from_utf8(&self.data[..e.valid_up_to()]).unwrap_or(""),
        }
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for LineBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        let remaining = LINE_SIZE - self.len;
        let to_copy = bytes.len().min(remaining);
        self.data[self.len..self.len + to_copy].copy_from_slice(&bytes[..to_copy]);
        self.len += to_copy;
        Ok(())
    }
}

/// Format one record the way the stage logger prints it.
pub fn format_line(buf: &mut LineBuffer, level: Level, target: &str, args: fmt::Arguments<'_>) {
    let level_str = match level {
        Level::Error => "ERROR",
        Level::Warn => " WARN",
        Level::Info => " INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    };
    let _ = writeln!(buf, "{} {}: {}", level_str, target, args);
}

struct StageLogger;

static CONSOLE: Once<&'static dyn Console> = Once::new();
static LOGGER: StageLogger = StageLogger;

impl Log for StageLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Some(console) = CONSOLE.get() {
            let mut line = LineBuffer::new();
            format_line(&mut line, record.level(), record.target(), *record.args());
            console.puts(line.as_str());
        }
    }

    fn flush(&self) {}
}

/// Route `log` records to `console`.
///
/// Only the first call has an effect.
pub fn init(console: &'static dyn Console, level: LevelFilter) {
    if CONSOLE.is_completed() {
        return;
    }
    CONSOLE.call_once(|| console);
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(level))
        .ok();
}
