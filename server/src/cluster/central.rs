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

//! The central coordinator: the node registry (`{node -> Node{workers,
//! databases, backup}}`), JWT issuance, authorization and the dispatch policy
//! that decides which worker serves a given request.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use libsky::error::{LoaditError, LoaditResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// What central knows about one node: its workers' addresses and current
/// in-flight load, the content hash it advertises for each database it holds,
/// and whether it's a read-only backup replica.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Node {
    pub workers: HashMap<String, u32>,
    pub databases: HashMap<String, String>,
    pub backup: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    is_admin: bool,
    exp: usize,
}

/// Issues and verifies client JWTs, and tracks every registered node's
/// advertised state for dispatch decisions.
pub struct Central {
    master_key: Vec<u8>,
    nodes: RwLock<HashMap<String, Node>>,
}

const TOKEN_LIFETIME_SECS: usize = 12 * 3600;

impl Central {
    /// `master_key` is generated fresh per process run and never persisted;
    /// restarting central invalidates every outstanding token.
    pub fn new(master_key: Vec<u8>) -> Self {
        Self { master_key, nodes: RwLock::new(HashMap::new()) }
    }

    pub fn issue_token(&self, user: &str, is_admin: bool) -> LoaditResult<String> {
        let claims = Claims {
            sub: user.to_owned(),
            is_admin,
            exp: now_unix() + TOKEN_LIFETIME_SECS,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(&self.master_key))
            .map_err(|e| LoaditError::Other(format!("JWT issuance failed: {e}")))
    }

    /// Returns `(user, is_admin)` if `token` is well-formed, signed by this run's
    /// master key, and not expired.
    pub fn verify_token(&self, token: &str) -> LoaditResult<(String, bool)> {
        let data = decode::<Claims>(token, &DecodingKey::from_secret(&self.master_key), &Validation::default())
            .map_err(|_| LoaditError::Permission("invalid or expired token".into()))?;
        Ok((data.claims.sub, data.claims.is_admin))
    }

    pub fn register_node(&self, addr: &str, node: Node) {
        self.nodes.write().insert(addr.to_owned(), node);
    }

    pub fn remove_node(&self, addr: &str) {
        self.nodes.write().remove(addr);
    }

    pub fn remove_worker(&self, node_addr: &str, worker_addr: &str) {
        if let Some(node) = self.nodes.write().get_mut(node_addr) {
            node.workers.remove(worker_addr);
        }
    }

    /// Every database name advertised by any registered node, for `list_databases`.
    pub fn known_databases(&self) -> Vec<String> {
        let mut names: HashSet<String> = HashSet::new();
        for node in self.nodes.read().values() {
            names.extend(node.databases.keys().cloned());
        }
        let mut names: Vec<String> = names.into_iter().collect();
        names.sort();
        names
    }

    /// The hash `own_node_addr` itself advertises for `database` — this node's
    /// own copy is always treated as authoritative for requests it originates.
    pub fn authoritative_hash(&self, own_node_addr: &str, database: &str) -> LoaditResult<String> {
        self.nodes
            .read()
            .get(own_node_addr)
            .and_then(|node| node.databases.get(database).cloned())
            .ok_or_else(|| LoaditError::NotFound(format!("database '{database}' not known on {own_node_addr}")))
    }

    /// Record a worker's in-flight load after dispatch or release, and (if this
    /// release touched a database) refresh that node's advertised hash for it.
    pub fn update_worker_load(&self, node_addr: &str, worker_addr: &str, load: u32, databases: Option<HashMap<String, String>>) {
        let mut nodes = self.nodes.write();
        if let Some(node) = nodes.get_mut(node_addr) {
            node.workers.insert(worker_addr.to_owned(), load);
            if let Some(dbs) = databases {
                node.databases.extend(dbs);
            }
        }
    }

    /// Dispatch policy: for a read, the node with the smallest in-flight
    /// load whose advertised hash for `database` matches `authoritative_hash`
    /// (only fresh replicas are eligible); for a write, `own_node_addr` always
    /// (the authoritative copy, since writes aren't replicated directly).
    pub fn dispatch(&self, database: &str, authoritative_hash: &str, exclusive: bool, own_node_addr: &str) -> LoaditResult<(String, String)> {
        let nodes = self.nodes.read();
        if exclusive {
            let node = nodes
                .get(own_node_addr)
                .ok_or_else(|| LoaditError::NotFound(format!("own node '{own_node_addr}' not registered")))?;
            let worker = least_loaded_worker(node)?;
            return Ok((own_node_addr.to_owned(), worker));
        }

        let mut best: Option<(String, String, u32)> = None;
        for (node_addr, node) in nodes.iter() {
            if node.databases.get(database).map(|h| h.as_str()) != Some(authoritative_hash) {
                continue;
            }
            if let Ok(worker_addr) = least_loaded_worker(node) {
                let load = node.workers[&worker_addr];
                if best.as_ref().map(|(_, _, l)| load < *l).unwrap_or(true) {
                    best = Some((node_addr.clone(), worker_addr, load));
                }
            }
        }
        let (node_addr, worker_addr, _) =
            best.ok_or_else(|| LoaditError::NotFound(format!("no fresh replica of '{database}' available")))?;
        Ok((node_addr, worker_addr))
    }
}

fn least_loaded_worker(node: &Node) -> LoaditResult<String> {
    node.workers
        .iter()
        .min_by_key(|(_, load)| **load)
        .map(|(addr, _)| addr.clone())
        .ok_or_else(|| LoaditError::NotFound("node has no registered workers".into()))
}

fn now_unix() -> usize {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as usize)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(workers: &[(&str, u32)], databases: &[(&str, &str)]) -> Node {
        Node {
            workers: workers.iter().map(|(a, l)| (a.to_string(), *l)).collect(),
            databases: databases.iter().map(|(d, h)| (d.to_string(), h.to_string())).collect(),
            backup: false,
        }
    }

    #[test]
    fn token_round_trips_and_rejects_tampering() {
        let central = Central::new(b"test-master-key".to_vec());
        let token = central.issue_token("alice", false).unwrap();
        let (user, is_admin) = central.verify_token(&token).unwrap();
        assert_eq!(user, "alice");
        assert!(!is_admin);

        let other = Central::new(b"different-key".to_vec());
        assert!(other.verify_token(&token).is_err());
    }

    #[test]
    fn dispatch_picks_least_loaded_fresh_replica() {
        let central = Central::new(b"k".to_vec());
        central.register_node("nodeA", node(&[("w1", 5)], &[("QUAD4", "hash1")]));
        central.register_node("nodeB", node(&[("w1", 2)], &[("QUAD4", "hash1")]));
        central.register_node("nodeC", node(&[("w1", 0)], &[("QUAD4", "stale_hash")]));

        let (node_addr, worker_addr) = central.dispatch("QUAD4", "hash1", false, "nodeA").unwrap();
        assert_eq!(node_addr, "nodeB");
        assert_eq!(worker_addr, "w1");
    }

    #[test]
    fn writes_always_dispatch_to_own_node() {
        let central = Central::new(b"k".to_vec());
        central.register_node("nodeA", node(&[("w1", 5)], &[("QUAD4", "hash1")]));
        central.register_node("nodeB", node(&[("w1", 0)], &[("QUAD4", "hash1")]));

        let (node_addr, _) = central.dispatch("QUAD4", "hash1", true, "nodeA").unwrap();
        assert_eq!(node_addr, "nodeA");
    }
}
