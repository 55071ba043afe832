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

//! Session records and the encrypted-at-rest store central keeps them in.
//! The store is a single file, AES-256-GCM sealed with a key derived from the
//! admin-supplied password at startup; central refuses to start (or falls back to
//! a fresh empty store, for a brand-new deployment) if the password doesn't open it.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use libsky::error::{LoaditError, LoaditResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;

/// `{user, is_admin, create_allowed, databases: [allowed names] | null}`.
/// `databases: None` means unrestricted (every database this node knows about).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub user: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub create_allowed: bool,
    pub databases: Option<Vec<String>>,
}

impl Session {
    pub fn new(user: impl Into<String>, password: &str, is_admin: bool, create_allowed: bool, databases: Option<Vec<String>>) -> LoaditResult<Self> {
        let password_hash = rcrypt::hash(password, rcrypt::DEFAULT_COST).map_err(|e| LoaditError::Other(format!("password hash failed: {e}")))?;
        Ok(Self { user: user.into(), password_hash, is_admin, create_allowed, databases })
    }

    pub fn verify(&self, password: &str) -> bool {
        rcrypt::verify(password, &self.password_hash).unwrap_or(false)
    }

    /// Whether this session may touch database `name` at all: non-admins are
    /// restricted to their `databases` allow-list.
    pub fn can_access(&self, name: &str) -> bool {
        self.is_admin || self.databases.as_ref().map(|dbs| dbs.iter().any(|d| d == name)).unwrap_or(true)
    }
}

#[derive(Default, Serialize, Deserialize)]
struct SessionFile {
    sessions: HashMap<String, Session>,
}

/// The in-memory, unlocked session store, flushed back to disk (re-encrypted)
/// after every mutation.
pub struct SessionStore {
    path: std::path::PathBuf,
    key: Aes256Gcm,
    sessions: HashMap<String, Session>,
}

fn derive_key(password: &str) -> Key<Aes256Gcm> {
    let digest = Sha256::digest(password.as_bytes());
    *Key::<Aes256Gcm>::from_slice(&digest)
}

impl SessionStore {
    /// Unlock (or, if `path` doesn't exist yet, create) the session store at
    /// `path` using `password`. A wrong password on an existing store surfaces as
    /// `Permission`, not a silently empty store.
    pub fn open(path: impl Into<std::path::PathBuf>, password: &str) -> LoaditResult<Self> {
        let path = path.into();
        let key = Aes256Gcm::new(&derive_key(password));
        if !path.exists() {
            return Ok(Self { path, key, sessions: HashMap::new() });
        }
        let raw = std::fs::read(&path)?;
        if raw.len() < 12 {
            return Err(LoaditError::Protocol("session store file is truncated".into()));
        }
        let (nonce_bytes, ciphertext) = raw.split_at(12);
        let plaintext = key
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| LoaditError::Permission("session store password is incorrect".into()))?;
        let file: SessionFile = serde_json::from_slice(&plaintext)?;
        Ok(Self { path, key, sessions: file.sessions })
    }

    pub fn get(&self, user: &str) -> Option<&Session> {
        self.sessions.get(user)
    }

    pub fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn upsert(&mut self, session: Session) -> LoaditResult<()> {
        self.sessions.insert(session.user.clone(), session);
        self.flush()
    }

    pub fn remove(&mut self, user: &str) -> LoaditResult<()> {
        self.sessions.remove(user);
        self.flush()
    }

    fn flush(&self) -> LoaditResult<()> {
        let file = SessionFile { sessions: self.sessions.clone() };
        let plaintext = serde_json::to_vec(&file)?;
        let nonce_bytes: [u8; 12] = rand_nonce();
        let ciphertext = self
            .key
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_ref())
            .map_err(|e| LoaditError::Other(format!("session store encryption failed: {e}")))?;
        let mut out = nonce_bytes.to_vec();
        out.extend(ciphertext);
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, out)?;
        Ok(())
    }
}

fn rand_nonce() -> [u8; 12] {
    use std::time::{SystemTime, UNIX_EPOCH};
    let seed = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
    let mut bytes = [0u8; 12];
    bytes.copy_from_slice(&Sha256::digest(seed.to_le_bytes())[..12]);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_password_is_rejected_on_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sessions.enc");
        let mut store = SessionStore::open(&path, "correct horse").unwrap();
        let session = Session::new("alice", "hunter2", false, false, Some(vec!["QUAD4".into()])).unwrap();
        store.upsert(session).unwrap();

        assert!(SessionStore::open(&path, "wrong password").is_err());
        let reopened = SessionStore::open(&path, "correct horse").unwrap();
        assert!(reopened.get("alice").unwrap().verify("hunter2"));
    }

    #[test]
    fn admin_can_access_any_database() {
        let session = Session::new("root", "pw", true, true, None).unwrap();
        assert!(session.can_access("ANYTHING"));
    }

    #[test]
    fn non_admin_is_restricted_to_allow_list() {
        let session = Session::new("alice", "pw", false, false, Some(vec!["QUAD4".into()])).unwrap();
        assert!(session.can_access("QUAD4"));
        assert!(!session.can_access("TRIA3"));
    }
}
