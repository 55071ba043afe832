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

//! # loadit
//!
//! `loadit-node` is the database server: it stores FEA result tables in a dual-layout
//! columnar format, ingests punch-card decks into them, answers field/aggregation
//! queries, and clusters behind a central coordinator. See the submodules for the
//! design of each piece.

pub mod cluster;
pub mod config;
pub mod database;
pub mod ingest;
pub mod net;
pub mod query;
pub mod registry;
pub mod storage;
pub mod tls;

pub use libsky::error::{LoaditError, LoaditResult};
