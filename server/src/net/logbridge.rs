/*
 * Created on Thu Jul 02 2020
 *
 * This file is a part of Skytable
 * Skytable (formerly known as TerrabaseDB or Skybase) is a free and open-source
 * NoSQL database written by Sayan Nandan ("the Author") with the
 * vision to provide flexibility in data modelling without compromising
 * on performance, queryability or scalability.
 *
 * Copyright (c) 2020, Sayan Nandan <ohsayan@outlook.com>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! Forwards log records to whichever client is attached to the request that
//! produced them, as `d`/`i`/`w`/`e`/`c` frames, rather than only writing them to
//! the node's own log file. A worker's progress messages during a long-running
//! query should be visible to the client that asked for it, not just to whoever
//! is tailing that worker's log.
//!
//! The buffer is filled by the global `log` facade (any `log::info!` etc. call
//! made while a buffer is registered for the current thread lands here too) and
//! drained by the request handler once the operation completes or on each flush
//! tick, the way a client watches a job progress in real time.

use crate::net::frame::LogLevel;
use log::{Level, Log, Metadata, Record};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

fn to_frame_level(level: Level) -> LogLevel {
    match level {
        Level::Error => LogLevel::Error,
        Level::Warn => LogLevel::Warning,
        Level::Info => LogLevel::Info,
        Level::Debug | Level::Trace => LogLevel::Debug,
    }
}

/// A thread-shared ring of not-yet-forwarded log lines. Cloned cheaply; every
/// clone observes the same underlying buffer.
#[derive(Clone, Default)]
pub struct LogBuffer {
    inner: Arc<Mutex<VecDeque<(LogLevel, String)>>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, level: LogLevel, message: String) {
        self.inner.lock().push_back((level, message));
    }

    /// Take every buffered record, leaving the buffer empty (mirrors the
    /// original's `pull`: read the accumulated text, then truncate).
    pub fn drain(&self) -> Vec<(LogLevel, String)> {
        let mut guard = self.inner.lock();
        guard.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// A `log::Log` implementation that appends every record at or above its
/// configured level into a [`LogBuffer`], in addition to whatever other logger
/// (e.g. `env_logger`) is installed — install this one wrapped alongside the
/// node's normal logger, not in place of it.
pub struct BufferLogger {
    buffer: LogBuffer,
    level: Level,
}

impl BufferLogger {
    pub fn new(buffer: LogBuffer, level: Level) -> Self {
        Self { buffer, level }
    }
}

impl Log for BufferLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        self.buffer.push(to_frame_level(record.level()), format!("{}", record.args()));
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_drain_empties_the_buffer() {
        let buf = LogBuffer::new();
        buf.push(LogLevel::Info, "starting batch".into());
        buf.push(LogLevel::Warning, "low disk space".into());
        assert!(!buf.is_empty());

        let drained = buf.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0], (LogLevel::Info, "starting batch".to_string()));
        assert!(buf.is_empty());
    }

    #[test]
    fn logger_filters_below_configured_level() {
        let buf = LogBuffer::new();
        let logger = BufferLogger::new(buf.clone(), Level::Warn);
        let record = Record::builder()
            .args(format_args!("noisy"))
            .level(Level::Debug)
            .target("test")
            .build();
        logger.log(&record);
        assert!(buf.is_empty());
    }
}
