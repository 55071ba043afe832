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

//! Node configuration. Unlike the teacher's YAML config file, a loadit node has no
//! required configuration file: everything needed to start a node is a CLI flag or
//! has a sane default, per the "No required environment variables" clause of the
//! external interfaces. `NodeConfig` is shared by both the `central` and `worker`
//! roles; the role itself is a runtime choice, not a compile-time one.

use clap::Parser;
use std::path::PathBuf;

/// Default listener port for a node's client-facing socket.
pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone, Parser)]
#[command(name = "loadit-node", about = "loadit FEA result database node daemon")]
pub struct NodeConfig {
    /// Address of the central coordinator this node registers against
    #[arg(long)]
    pub central: String,

    /// Root directory containing this node's databases
    #[arg(long, default_value = "./databases")]
    pub path: PathBuf,

    /// Number of worker tasks to run (defaults to available parallelism)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Run this node as a read-only backup replica: it pulls every database on sync
    #[arg(long)]
    pub backup: bool,

    /// Enable verbose (debug-level) logging regardless of LOADIT_LOG
    #[arg(long)]
    pub debug: bool,

    /// PEM certificate chain for the TLS listener
    #[arg(long)]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key for the TLS listener
    #[arg(long)]
    pub tls_key: Option<PathBuf>,

    /// Local bind address for this node's client-facing listener
    #[arg(long, default_value_t = format!("0.0.0.0:{DEFAULT_PORT}"))]
    pub bind: String,
}

impl NodeConfig {
    pub fn init_logger(&self) {
        let default_filter = if self.debug { "debug" } else { "info" };
        env_logger::Builder::new()
            .parse_filters(&std::env::var("LOADIT_LOG").unwrap_or_else(|_| default_filter.to_owned()))
            .init();
    }

    pub fn worker_count(&self) -> usize {
        self.workers
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_count_falls_back_to_parallelism() {
        let cfg = NodeConfig {
            central: "127.0.0.1:9000".into(),
            path: "./databases".into(),
            workers: None,
            backup: false,
            debug: false,
            tls_cert: None,
            tls_key: None,
            bind: "0.0.0.0:8080".into(),
        };
        assert!(cfg.worker_count() >= 1);
    }

    #[test]
    fn explicit_worker_count_is_respected() {
        let mut cfg = NodeConfig {
            central: "127.0.0.1:9000".into(),
            path: "./databases".into(),
            workers: Some(4),
            backup: false,
            debug: false,
            tls_cert: None,
            tls_key: None,
            bind: "0.0.0.0:8080".into(),
        };
        assert_eq!(cfg.worker_count(), 4);
        cfg.workers = None;
        assert_ne!(cfg.worker_count(), 0);
    }
}
