/*
 * Created on Mon Jul 20 2020
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

use std::{fmt, io::Error as IoError};

pub type LoaditResult<T> = Result<T, LoaditError>;

/// The single error type shared by the storage engine, the query engine and the
/// cluster protocol. Every fallible operation in `server` and `cli` resolves to one
/// of these variants, which mirror the abstract error kinds a client can observe
/// over the wire (the `e` frame carries `Display::to_string()` of one of these).
#[derive(Debug)]
pub enum LoaditError {
    /// requested database, table or batch does not exist
    NotFound(String),
    /// attempted to create something that already exists
    AlreadyExists(String),
    /// a `.pch` record or a table manifest did not match the expected schema
    InvalidSchema(String),
    /// a query expression or request could not be parsed or resolved
    InvalidQuery(String),
    /// a hash-chain, checksum or manifest consistency check failed
    Integrity(String),
    /// the requested query would exceed the configured memory budget
    OutOfMemory(String),
    /// the session does not hold the lock or credentials required for this operation
    Permission(String),
    /// a wire-protocol framing or handshake violation
    Protocol(String),
    Io(IoError),
    IoExtra(IoError, String),
    Tls(openssl::error::ErrorStack),
    Other(String),
}

impl LoaditError {
    pub fn io_extra(ioe: IoError, extra: impl ToString) -> Self {
        Self::IoExtra(ioe, extra.to_string())
    }
}

impl fmt::Display for LoaditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(m) => write!(f, "not found: {m}"),
            Self::AlreadyExists(m) => write!(f, "already exists: {m}"),
            Self::InvalidSchema(m) => write!(f, "invalid schema: {m}"),
            Self::InvalidQuery(m) => write!(f, "invalid query: {m}"),
            Self::Integrity(m) => write!(f, "integrity check failed: {m}"),
            Self::OutOfMemory(m) => write!(f, "out of memory: {m}"),
            Self::Permission(m) => write!(f, "permission denied: {m}"),
            Self::Protocol(m) => write!(f, "protocol error: {m}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::IoExtra(e, extra) => write!(f, "I/O error while {extra}: {e}"),
            Self::Tls(e) => write!(f, "TLS error: {e}"),
            Self::Other(m) => write!(f, "{m}"),
        }
    }
}

impl std::error::Error for LoaditError {}

impl From<IoError> for LoaditError {
    fn from(e: IoError) -> Self {
        Self::Io(e)
    }
}

impl From<openssl::error::ErrorStack> for LoaditError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        Self::Tls(e)
    }
}

impl From<openssl::ssl::Error> for LoaditError {
    fn from(e: openssl::ssl::Error) -> Self {
        Self::Other(format!("TLS error: {e}"))
    }
}

impl From<serde_json::Error> for LoaditError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidSchema(e.to_string())
    }
}

impl From<csv::Error> for LoaditError {
    fn from(e: csv::Error) -> Self {
        Self::InvalidQuery(format!("CSV: {e}"))
    }
}
