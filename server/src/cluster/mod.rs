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

//! The cluster protocol: a central coordinator holding sessions and the
//! node registry, workers that execute requests against local databases, the
//! per-database lock registry workers contend on, and `sync_databases`
//! replication between nodes.

pub mod central;
pub mod connection;
pub mod lock;
pub mod replicate;
pub mod session;
pub mod worker;

pub use central::{Central, Node};
pub use connection::handle_connection;
pub use lock::LockRegistry;
pub use session::{Session, SessionStore};
pub use worker::{Request, WorkerState};
