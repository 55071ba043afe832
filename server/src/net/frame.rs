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

//! Framed connection: every frame is a 7-byte little-endian length prefix
//! (a `u56`, so a single frame tops out at 2^56 bytes) followed by a 1-byte type
//! tag and then the payload. Bulk file transfer (table replication) bypasses this
//! framing entirely and uses its own 8-byte little-endian length with no tag, since
//! the receiver always knows from context that a file is coming.

use libsky::error::{LoaditError, LoaditResult};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const TAG_BYTES: u8 = b'b';
const TAG_BUFFER: u8 = b'B';
const TAG_JSON: u8 = b'j';
const TAG_DEBUG: u8 = b'd';
const TAG_INFO: u8 = b'i';
const TAG_WARNING: u8 = b'w';
const TAG_ERROR: u8 = b'e';
const TAG_CRITICAL: u8 = b'c';
const TAG_EXCEPTION: u8 = b'E';

const LEN_BYTES: usize = 7;
const MAX_FRAME_LEN: u64 = 1 << 56;

/// Log severities that travel over the wire as their own frame tags: the central
/// node forwards worker log records to whichever client is watching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    fn tag(self) -> u8 {
        match self {
            Self::Debug => TAG_DEBUG,
            Self::Info => TAG_INFO,
            Self::Warning => TAG_WARNING,
            Self::Error => TAG_ERROR,
            Self::Critical => TAG_CRITICAL,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            TAG_DEBUG => Some(Self::Debug),
            TAG_INFO => Some(Self::Info),
            TAG_WARNING => Some(Self::Warning),
            TAG_ERROR => Some(Self::Error),
            TAG_CRITICAL => Some(Self::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// raw bytes, tag `b` — a simple response payload
    Bytes(Vec<u8>),
    /// raw bytes, tag `B` — a query result buffer (CSV)
    Buffer(Vec<u8>),
    /// tag `j` — a structured request or response
    Json(serde_json::Value),
    /// tag `d`/`i`/`w`/`e`/`c` — a forwarded log record
    Log(LogLevel, String),
    /// tag `E` — an exception/error message, terminal for the request
    Exception(String),
}

fn encode_len(len: usize) -> LoaditResult<[u8; LEN_BYTES]> {
    if len as u64 >= MAX_FRAME_LEN {
        return Err(LoaditError::Protocol(format!("frame of {len} bytes exceeds the u56 length limit")));
    }
    let full = (len as u64).to_le_bytes();
    let mut out = [0u8; LEN_BYTES];
    out.copy_from_slice(&full[..LEN_BYTES]);
    Ok(out)
}

fn decode_len(bytes: [u8; LEN_BYTES]) -> usize {
    let mut full = [0u8; 8];
    full[..LEN_BYTES].copy_from_slice(&bytes);
    u64::from_le_bytes(full) as usize
}

/// Write one frame: `[len: u56 LE][tag: u8][payload]`.
pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, frame: &Frame) -> LoaditResult<()> {
    let (tag, payload): (u8, std::borrow::Cow<[u8]>) = match frame {
        Frame::Bytes(b) => (TAG_BYTES, std::borrow::Cow::Borrowed(b)),
        Frame::Buffer(b) => (TAG_BUFFER, std::borrow::Cow::Borrowed(b)),
        Frame::Json(v) => (TAG_JSON, std::borrow::Cow::Owned(serde_json::to_vec(v)?)),
        Frame::Log(level, msg) => (level.tag(), std::borrow::Cow::Borrowed(msg.as_bytes())),
        Frame::Exception(msg) => (TAG_EXCEPTION, std::borrow::Cow::Borrowed(msg.as_bytes())),
    };
    let len = encode_len(payload.len())?;
    w.write_all(&len).await?;
    w.write_all(&[tag]).await?;
    w.write_all(&payload).await?;
    w.flush().await?;
    Ok(())
}

/// Read one frame. Returns `Protocol` if the tag byte isn't one of the nine
/// recognized types.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> LoaditResult<Frame> {
    let mut len_buf = [0u8; LEN_BYTES];
    r.read_exact(&mut len_buf).await?;
    let len = decode_len(len_buf);
    let mut tag_buf = [0u8; 1];
    r.read_exact(&mut tag_buf).await?;
    let tag = tag_buf[0];
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload).await?;

    match tag {
        TAG_BYTES => Ok(Frame::Bytes(payload)),
        TAG_BUFFER => Ok(Frame::Buffer(payload)),
        TAG_JSON => Ok(Frame::Json(serde_json::from_slice(&payload)?)),
        TAG_EXCEPTION => Ok(Frame::Exception(String::from_utf8_lossy(&payload).into_owned())),
        _ => match LogLevel::from_tag(tag) {
            Some(level) => Ok(Frame::Log(level, String::from_utf8_lossy(&payload).into_owned())),
            None => Err(LoaditError::Protocol(format!("unrecognized frame tag {tag:#x}"))),
        },
    }
}

/// Send a raw file as a bulk transfer: `[len: u64 LE][bytes]`, no type tag. Used
/// by table replication (`sync_databases`), which always knows a file is coming
/// next from protocol context rather than from a tag byte.
pub async fn write_bulk<W: AsyncWrite + Unpin>(w: &mut W, bytes: &[u8]) -> LoaditResult<()> {
    w.write_all(&(bytes.len() as u64).to_le_bytes()).await?;
    w.write_all(bytes).await?;
    w.flush().await?;
    Ok(())
}

pub async fn read_bulk<R: AsyncRead + Unpin>(r: &mut R) -> LoaditResult<Vec<u8>> {
    let mut len_buf = [0u8; 8];
    r.read_exact(&mut len_buf).await?;
    let len = u64::from_le_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload).await?;
    Ok(payload)
}

const OK_TOKEN: &[u8] = b"OK";

/// Flow-control handshake ("wait/awake"): a receiver that needs the sender
/// to pause sends `OK` when it's ready for more, and the sender blocks on reading
/// it back before continuing. Used between bulk-transfer chunks during replication.
pub async fn send_ok<W: AsyncWrite + Unpin>(w: &mut W) -> LoaditResult<()> {
    w.write_all(OK_TOKEN).await?;
    w.flush().await?;
    Ok(())
}

pub async fn await_ok<R: AsyncRead + Unpin>(r: &mut R) -> LoaditResult<()> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf).await?;
    if buf == OK_TOKEN {
        Ok(())
    } else {
        Err(LoaditError::Protocol(format!("expected OK token, got {:?}", buf)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_json_frame() {
        let mut buf: Vec<u8> = Vec::new();
        let frame = Frame::Json(serde_json::json!({"fields": ["NX"], "lids": [1, 2]}));
        write_frame(&mut buf, &frame).await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let got = read_frame(&mut cursor).await.unwrap();
        assert_eq!(got, frame);
    }

    #[tokio::test]
    async fn round_trips_buffer_and_log_frames() {
        let mut buf: Vec<u8> = Vec::new();
        write_frame(&mut buf, &Frame::Buffer(b"LID,ID,NX\n1,1,2.0\n".to_vec())).await.unwrap();
        write_frame(&mut buf, &Frame::Log(LogLevel::Warning, "low disk space".into())).await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        match read_frame(&mut cursor).await.unwrap() {
            Frame::Buffer(b) => assert_eq!(b, b"LID,ID,NX\n1,1,2.0\n".to_vec()),
            other => panic!("unexpected frame {other:?}"),
        }
        match read_frame(&mut cursor).await.unwrap() {
            Frame::Log(LogLevel::Warning, msg) => assert_eq!(msg, "low disk space"),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_unknown_tag() {
        let mut buf = encode_len(0).unwrap().to_vec();
        buf.push(b'?');
        let mut cursor = std::io::Cursor::new(buf);
        assert!(read_frame(&mut cursor).await.is_err());
    }

    #[tokio::test]
    async fn bulk_transfer_round_trips() {
        let mut buf: Vec<u8> = Vec::new();
        write_bulk(&mut buf, b"table bytes go here").await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let got = read_bulk(&mut cursor).await.unwrap();
        assert_eq!(got, b"table bytes go here".to_vec());
    }

    #[tokio::test]
    async fn ok_token_round_trips() {
        let mut buf: Vec<u8> = Vec::new();
        send_ok(&mut buf).await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        await_ok(&mut cursor).await.unwrap();
    }
}
