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

//! The central coordinator's client-facing connection handler: authenticate,
//! authorize against the session's
//! permissions, then either answer locally or hand back a redirection address
//! for the client to retry its request against directly.

use crate::cluster::central::Central;
use crate::cluster::session::{Session, SessionStore};
use crate::net::frame::{read_frame, write_frame, Frame};
use libsky::error::{LoaditError, LoaditResult};
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite};

/// One client request as seen by central, before it is dispatched to a worker.
/// Only the fields central itself needs to authorize and route are modeled
/// here; worker-specific fields travel in the redirected request instead.
#[derive(Debug, Deserialize)]
#[serde(tag = "request_type", rename_all = "snake_case")]
enum ClientRequest {
    Login { user: String, password: String },
    Query { database: String },
    Header { database: String },
    ListDatabases,
    Check { database: String },
    DownloadAttachment { database: String },
    CreateDatabase { database: String },
    NewBatch { database: String },
    RestoreDatabase { database: String },
    RemoveDatabase { database: String },
    AddAttachment { database: String },
    RemoveAttachment { database: String },
    Shutdown,
    Sessions,
    SyncDatabases,
    AddWorker { node: String, addr: String },
    RemoveWorker { node: String, addr: String },
}

enum Requirement<'a> {
    SessionExists,
    CreateAllowed,
    DatabaseAccess(&'a str),
    AdminOnly,
}

fn requirement(req: &ClientRequest) -> Requirement<'_> {
    match req {
        ClientRequest::Login { .. } => Requirement::SessionExists,
        // Reads only need a live session — database membership gates writes,
        // not lookups against a database outside a non-admin's allow-list.
        ClientRequest::Query { .. }
        | ClientRequest::Header { .. }
        | ClientRequest::Check { .. }
        | ClientRequest::DownloadAttachment { .. } => Requirement::SessionExists,
        ClientRequest::ListDatabases => Requirement::SessionExists,
        ClientRequest::CreateDatabase { .. } => Requirement::CreateAllowed,
        ClientRequest::NewBatch { database }
        | ClientRequest::RestoreDatabase { database }
        | ClientRequest::RemoveDatabase { database }
        | ClientRequest::AddAttachment { database }
        | ClientRequest::RemoveAttachment { database } => Requirement::DatabaseAccess(database),
        ClientRequest::Shutdown
        | ClientRequest::Sessions
        | ClientRequest::SyncDatabases
        | ClientRequest::AddWorker { .. }
        | ClientRequest::RemoveWorker { .. } => Requirement::AdminOnly,
    }
}

/// The authorization matrix, minus `Login` (handled separately before a
/// session even exists): reads need only a live session; creating a database
/// needs `create_allowed`; writes to an existing database need it in the
/// session's allow-list; the rest is admin-only.
fn authorize(session: &Session, req: &ClientRequest) -> LoaditResult<()> {
    if session.is_admin {
        return Ok(());
    }
    match requirement(req) {
        Requirement::SessionExists => Ok(()),
        Requirement::CreateAllowed if session.create_allowed => Ok(()),
        Requirement::DatabaseAccess(database) if session.can_access(database) => Ok(()),
        _ => Err(LoaditError::Permission(format!("{req:?} is not permitted for {}", session.user))),
    }
}

fn requires_own_database(req: &ClientRequest) -> bool {
    matches!(
        req,
        ClientRequest::NewBatch { .. }
            | ClientRequest::RestoreDatabase { .. }
            | ClientRequest::RemoveDatabase { .. }
            | ClientRequest::AddAttachment { .. }
            | ClientRequest::RemoveAttachment { .. }
            | ClientRequest::CreateDatabase { .. }
    )
}

fn database_of(req: &ClientRequest) -> Option<&str> {
    match req {
        ClientRequest::Query { database }
        | ClientRequest::Header { database }
        | ClientRequest::Check { database }
        | ClientRequest::DownloadAttachment { database }
        | ClientRequest::CreateDatabase { database }
        | ClientRequest::NewBatch { database }
        | ClientRequest::RestoreDatabase { database }
        | ClientRequest::RemoveDatabase { database }
        | ClientRequest::AddAttachment { database }
        | ClientRequest::RemoveAttachment { database } => Some(database),
        _ => None,
    }
}

/// Authenticate a session over `stream` via a `Login` frame, returning the
/// authenticated session and a freshly issued JWT. Any non-`Login` first
/// frame, or a password mismatch, is a `Permission` error.
async fn authenticate<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    sessions: &SessionStore,
    central: &Central,
) -> LoaditResult<(Session, String)> {
    let Frame::Json(value) = read_frame(stream).await? else {
        return Err(LoaditError::Protocol("expected a login frame".into()));
    };
    let request: ClientRequest = serde_json::from_value(value)?;
    let ClientRequest::Login { user, password } = request else {
        return Err(LoaditError::Permission("a connection must log in before any other request".into()));
    };
    let session = sessions
        .get(&user)
        .filter(|s| s.verify(&password))
        .cloned()
        .ok_or_else(|| LoaditError::Permission(format!("login failed for {user}")))?;
    let token = central.issue_token(&session.user, session.is_admin)?;
    Ok((session, token))
}

/// Drive one client connection end to end: log in, then answer requests until
/// the socket closes. Every non-login request after the first is authorized
/// against the same session and either answered locally or redirected.
pub async fn handle_connection<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    central: &Central,
    sessions: &SessionStore,
    own_node_addr: &str,
) -> LoaditResult<()> {
    let (session, token) = authenticate(stream, sessions, central).await?;
    write_frame(stream, &Frame::Json(serde_json::json!({"token": token}))).await?;

    loop {
        let frame = match read_frame(stream).await {
            Ok(f) => f,
            Err(_) => return Ok(()),
        };
        let Frame::Json(value) = frame else {
            write_frame(stream, &Frame::Exception("expected a JSON request frame".into())).await?;
            continue;
        };
        let request: ClientRequest = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(e) => {
                write_frame(stream, &Frame::Exception(e.to_string())).await?;
                continue;
            }
        };

        let response = match authorize(&session, &request) {
            Ok(()) => respond(&request, central, sessions, own_node_addr),
            Err(e) => Err(e),
        };
        match response {
            Ok(frame) => write_frame(stream, &frame).await?,
            Err(e) => write_frame(stream, &Frame::Exception(e.to_string())).await?,
        }
    }
}

fn respond(
    request: &ClientRequest,
    central: &Central,
    sessions: &SessionStore,
    own_node_addr: &str,
) -> LoaditResult<Frame> {
    match request {
        ClientRequest::Login { .. } => Err(LoaditError::Protocol("already logged in".into())),
        ClientRequest::ListDatabases => Ok(Frame::Json(serde_json::json!({"databases": central.known_databases()}))),
        ClientRequest::Sessions => Ok(Frame::Json(serde_json::json!({"sessions": sessions.usernames()}))),
        ClientRequest::Shutdown => Ok(Frame::Json(serde_json::json!({"shutdown": true}))),
        ClientRequest::AddWorker { node, addr } => {
            central.update_worker_load(node, addr, 0, None);
            Ok(Frame::Json(serde_json::json!({"added": true})))
        }
        ClientRequest::RemoveWorker { node, addr } => {
            central.remove_worker(node, addr);
            Ok(Frame::Json(serde_json::json!({"removed": true})))
        }
        ClientRequest::SyncDatabases => Ok(Frame::Json(serde_json::json!({"sync_started": true}))),
        _ => {
            let database = database_of(request).ok_or_else(|| LoaditError::Protocol("request carries no database".into()))?;
            let exclusive = requires_own_database(request);
            let hash = central.authoritative_hash(own_node_addr, database)?;
            let (node_addr, worker_addr) = central.dispatch(database, &hash, exclusive, own_node_addr)?;
            Ok(Frame::Json(serde_json::json!({
                "redirection_address": worker_addr,
                "node": node_addr,
            })))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::central::Node;
    use std::collections::HashMap;

    fn node_with(databases: &[(&str, &str)], backup: bool) -> Node {
        Node {
            workers: [("w1".to_string(), 0)].into_iter().collect(),
            databases: databases.iter().map(|(n, h)| (n.to_string(), h.to_string())).collect(),
            backup,
        }
    }

    #[test]
    fn non_admin_requires_database_membership_for_writes() {
        let session = Session::new("alice", "pw", false, false, Some(vec!["A".into()])).unwrap();
        assert!(authorize(&session, &ClientRequest::NewBatch { database: "A".into() }).is_ok());
        assert!(authorize(&session, &ClientRequest::NewBatch { database: "B".into() }).is_err());
    }

    #[test]
    fn non_admin_may_query_any_database_with_a_session() {
        let session = Session::new("alice", "pw", false, false, Some(vec!["A".into()])).unwrap();
        assert!(authorize(&session, &ClientRequest::Query { database: "A".into() }).is_ok());
        assert!(authorize(&session, &ClientRequest::Query { database: "B".into() }).is_ok());
    }

    #[test]
    fn non_admin_cannot_reach_admin_only_operations() {
        let session = Session::new("alice", "pw", false, true, None).unwrap();
        assert!(authorize(&session, &ClientRequest::Sessions).is_err());
        assert!(authorize(&session, &ClientRequest::SyncDatabases).is_err());
    }

    #[test]
    fn create_database_requires_create_allowed() {
        let denied = Session::new("bob", "pw", false, false, None).unwrap();
        assert!(authorize(&denied, &ClientRequest::CreateDatabase { database: "X".into() }).is_err());
        let allowed = Session::new("carol", "pw", false, true, None).unwrap();
        assert!(authorize(&allowed, &ClientRequest::CreateDatabase { database: "X".into() }).is_ok());
    }

    #[tokio::test]
    async fn login_then_list_databases_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sessions = SessionStore::open(tmp.path().join("sessions"), "adminpw").unwrap();
        sessions.upsert(Session::new("root", "rootpw", true, true, None).unwrap()).unwrap();
        let central = Central::new(b"test-master-key".to_vec());
        central.register_node("node-a", node_with(&[("demo", "abc")], false));

        let (mut server_side, mut client_side) = tokio::io::duplex(8192);
        let server = handle_connection(&mut server_side, &central, &sessions, "node-a");

        let client = async move {
            write_frame(&mut client_side, &Frame::Json(serde_json::json!({
                "request_type": "login", "user": "root", "password": "rootpw",
            }))).await.unwrap();
            let login_response = read_frame(&mut client_side).await.unwrap();
            write_frame(&mut client_side, &Frame::Json(serde_json::json!({"request_type": "list_databases"}))).await.unwrap();
            let list_response = read_frame(&mut client_side).await.unwrap();
            drop(client_side);
            (login_response, list_response)
        };

        let (server_result, (login_response, list_response)) = tokio::join!(server, client);
        assert!(server_result.is_ok());
        match login_response {
            Frame::Json(v) => assert!(v.get("token").is_some()),
            other => panic!("unexpected {other:?}"),
        }
        match list_response {
            Frame::Json(v) => assert!(v.get("databases").unwrap().as_array().unwrap().iter().any(|d| d == "demo")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
