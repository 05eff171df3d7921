//! Structured logging, teed to the debug log file and the in-memory ring
//! telemetry reads from (§4.8, §6 "Log file").
//!
//! The log file is truncated at construction, matching §6's "truncated at
//! engine construction". Every formatted line also lands in a
//! [`LogRing`] so `Telemetry::logs` can serve it without touching disk.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Arc;

use chrono::Local;
use tracing::Subscriber;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, MakeWriter};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::telemetry::LogRing;

/// Renders `[HH:MM:SS] [LEVEL] message` (§4.8).
struct LineFormat;

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let now = Local::now().format("%H:%M:%S");
        let level = event.metadata().level();
        write!(writer, "[{now}] [{level}] ")?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Writer that appends raw bytes to the log file and, once a full line has
/// accumulated, pushes the trimmed line into the ring.
struct TeeWriter {
    file: File,
    ring: Arc<LogRing>,
    buf: Vec<u8>,
}

impl io::Write for TeeWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.file.write_all(data)?;
        self.buf.extend_from_slice(data);
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line = self.buf.drain(..=pos).collect::<Vec<u8>>();
            let line = String::from_utf8_lossy(&line).trim_end().to_string();
            if !line.is_empty() {
                self.ring.push(line);
            }
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

struct TeeMakeWriter {
    file: File,
    ring: Arc<LogRing>,
}

impl<'a> MakeWriter<'a> for TeeMakeWriter {
    type Writer = TeeWriter;

    fn make_writer(&'a self) -> Self::Writer {
        let file = self
            .file
            .try_clone()
            .expect("log file handle should be cloneable");
        TeeWriter {
            file,
            ring: self.ring.clone(),
            buf: Vec::new(),
        }
    }
}

/// Install the global tracing subscriber, truncating `log_path` and wiring
/// every event into both the file and `ring`. Call once per process.
pub fn init(log_path: &Path, ring: Arc<LogRing>) -> io::Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(log_path)?;

    let writer = TeeMakeWriter { file, ring };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .event_format(LineFormat)
        .with_writer(writer)
        .with_ansi(false)
        .init();

    Ok(())
}
