//! Line-oriented logging with timestamps, source locations and ANSI colour.
//!
//! The [`ulog!`] macro writes lines in the format:
//!
//! ```text
//! 20261019T09:12:44.031 - src/server/handlers/likes.rs:57 - like: u-3f9a1c2 liked r-8be01d4
//! ```
//!
//! On a terminal, timestamps and locations are dimmed and ids get a stable
//! colour derived from their content. [`set_writer`] redirects output to any
//! [`std::io::Write`] (tests capture lines into a buffer this way).
//!
//! Logging never panics and never reports failure to the caller: a poisoned
//! writer lock is recovered and write errors are dropped.

use std::io::{self, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{LazyLock, Mutex, MutexGuard};
use std::time::SystemTime;

static COLOUR_ENABLED: AtomicBool = AtomicBool::new(false);

static LOG_WRITER: LazyLock<Mutex<Box<dyn Write + Send>>> =
    LazyLock::new(|| Mutex::new(Box::new(io::stderr())));

/// Detect colour support on stderr. Call once at startup.
pub fn init() {
    COLOUR_ENABLED.store(io::stderr().is_terminal(), Ordering::Relaxed);
}

/// Send all subsequent [`ulog!`] output to `w`. Disables colour.
pub fn set_writer(w: Box<dyn Write + Send>) {
    COLOUR_ENABLED.store(false, Ordering::Relaxed);
    *writer() = w;
}

pub fn colour_enabled() -> bool {
    COLOUR_ENABLED.load(Ordering::Relaxed)
}

fn writer() -> MutexGuard<'static, Box<dyn Write + Send>> {
    LOG_WRITER.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";

const ID_COLOURS: &[&str] = &[
    "\x1b[91m", "\x1b[92m", "\x1b[93m", "\x1b[94m", "\x1b[95m", "\x1b[96m", "\x1b[31m",
    "\x1b[32m", "\x1b[33m", "\x1b[34m", "\x1b[35m", "\x1b[36m",
];

fn hash_colour(id: &str) -> &'static str {
    let hash: u32 = id
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    ID_COLOURS[(hash as usize) % ID_COLOURS.len()]
}

const LOG_ID_TRUNCATE_LEN: usize = 7;

fn truncate_id(id: &str) -> &str {
    let end = id
        .char_indices()
        .nth(LOG_ID_TRUNCATE_LEN)
        .map(|(i, _)| i)
        .unwrap_or(id.len());
    &id[..end]
}

fn tagged_id(prefix: &str, id: &str) -> String {
    let short = truncate_id(id);
    if colour_enabled() {
        format!("{}{prefix}-{short}{RESET}", hash_colour(id))
    } else {
        format!("{prefix}-{short}")
    }
}

/// Format a user (actor) id, e.g. `u-3f9a1c2`.
pub fn user_id(id: &str) -> String {
    tagged_id("u", id)
}

/// Format an engaged item id (resource, study group), e.g. `r-8be01d4`.
pub fn item_id(id: &str) -> String {
    tagged_id("r", id)
}

/// Current wall-clock time as `YYYYMMDDTHH:MM:SS.mmm` (UTC).
pub fn format_timestamp() -> String {
    let duration = SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = duration.as_secs();
    let millis = duration.subsec_millis();

    let time_secs = secs % 86400;
    let hours = time_secs / 3600;
    let minutes = (time_secs % 3600) / 60;
    let seconds = time_secs % 60;

    // Civil date from days since epoch (Howard Hinnant's algorithm).
    let days = (secs / 86400) as i64;
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };

    format!("{y:04}{m:02}{d:02}T{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
}

/// Write one log line. Called by [`ulog!`].
pub fn emit(file: &str, line: u32, msg: &str) {
    let ts = format_timestamp();
    let formatted = if colour_enabled() {
        format!("{DIM}{ts}{RESET} {DIM}{file}:{line}{RESET} {msg}")
    } else {
        format!("{ts} - {file}:{line} - {msg}")
    };
    let mut w = writer();
    let _ = writeln!(w, "{formatted}");
}

/// Emit a log line with timestamp and source location.
///
/// ```ignore
/// ulog!("comments: {} posted on {}", logging::user_id(&actor), logging::item_id(&id));
/// ```
#[macro_export]
macro_rules! ulog {
    ($($arg:tt)*) => {{
        $crate::logging::emit(file!(), line!(), &format!($($arg)*));
    }};
}
