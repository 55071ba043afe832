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

//! The client half of the worker wire protocol: connect
//! directly to a worker's socket, send one JSON request frame in the shape
//! `cluster::worker::Request` expects, and read back its response frame.

use libsky::error::{LoaditError, LoaditResult};
use loadit_node::net::frame::{read_frame, write_frame, Frame};
use tokio::net::TcpStream;

/// Send `request` to `addr` and return its response frame (`Buffer` for a CSV
/// query result, `Json` for everything else, or an `Err` if the worker replied
/// with an `Exception` frame).
pub async fn send_request(addr: &str, request: serde_json::Value) -> LoaditResult<Frame> {
    let mut stream = TcpStream::connect(addr).await?;
    write_frame(&mut stream, &Frame::Json(request)).await?;
    match read_frame(&mut stream).await? {
        Frame::Exception(msg) => Err(LoaditError::Protocol(msg)),
        other => Ok(other),
    }
}
