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

//! # loadit-node
//!
//! The node daemon started by `start-node`. Every node runs a local worker
//! pool against its own `--path` directory; if `--central` names this node's own
//! `--bind` address, it additionally stands up the central coordinator (session
//! store, node registry, JWT issuance) in the same process.

use libsky::error::LoaditResult;
use loadit_node::cluster::{Central, SessionStore, WorkerState};
use loadit_node::config::NodeConfig;
use loadit_node::tls::TlsListener;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::process;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::signal;

#[cfg(not(target_env = "msvc"))]
use jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

const PID_FILE: &str = ".loadit_pid";

fn main() {
    let config = <NodeConfig as clap::Parser>::parse();
    config.init_logger();
    let pid_file = run_pre_startup_tasks();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("loadit-node")
        .enable_all()
        .build()
        .expect("failed to start the tokio runtime");

    let result = runtime.block_on(run(config));

    drop(pid_file);
    if let Err(e) = fs::remove_file(PID_FILE) {
        log::error!("shutdown: failed to remove PID file: {e}");
    }

    match result {
        Ok(()) => log::info!("loadit-node stopped cleanly"),
        Err(e) => {
            log::error!("loadit-node exited with an error: {e}");
            process::exit(1);
        }
    }
}

async fn run(config: NodeConfig) -> LoaditResult<()> {
    fs::create_dir_all(&config.path)?;
    let is_self_central = config.central == config.bind;

    // A node always runs its own worker pool against `--path`. When it is also
    // the central coordinator, the worker pool moves to a derived port so
    // `--bind` itself is free for the client-facing central listener.
    let worker_bind = if is_self_central { derive_worker_bind(&config.bind) } else { config.bind.clone() };

    if is_self_central {
        let (user, password) = prompt_login();
        log::info!("this node is the central coordinator ({})", config.bind);
        let central = start_central()?;
        let mut sessions = SessionStore::open(config.path.join(".sessions"), &password)?;
        if sessions.get(&user).is_none() {
            log::info!("bootstrapping the first admin session for {user}");
            sessions.upsert(loadit_node::cluster::Session::new(&user, &password, true, true, None)?)?;
        }
        central.register_node(
            &worker_bind,
            loadit_node::cluster::Node { workers: Default::default(), databases: Default::default(), backup: config.backup },
        );
        let sessions = Arc::new(sessions);
        let central_listener = TcpListener::bind(&config.bind).await?;
        let central = Arc::clone(&central);
        let worker_bind_for_task = worker_bind.clone();
        tokio::spawn(async move {
            loop {
                match central_listener.accept().await {
                    Ok((mut stream, _)) => {
                        let central = Arc::clone(&central);
                        let sessions = Arc::clone(&sessions);
                        let worker_bind = worker_bind_for_task.clone();
                        tokio::spawn(async move {
                            if let Err(e) = loadit_node::cluster::handle_connection(&mut stream, &central, &sessions, &worker_bind).await {
                                log::warn!("central connection ended: {e}");
                            }
                        });
                    }
                    Err(e) => log::error!("central accept failed: {e}"),
                }
            }
        });
    } else {
        log::info!("registering as a worker node against central at {}", config.central);
    }

    let state = Arc::new(WorkerState::new(config.path.clone()));
    log::info!("listening on {worker_bind} ({} worker task(s) per connection)", config.worker_count());
    let listener = TcpListener::bind(&worker_bind).await?;

    if let (Some(cert), Some(key)) = (&config.tls_cert, &config.tls_key) {
        let tls = TlsListener::new_pem_based(key, cert, listener)?;
        loop {
            tokio::select! {
                accepted = tls.accept() => {
                    let mut stream = accepted?;
                    let state = state.clone();
                    tokio::spawn(async move { serve_connection(&mut stream, &state).await });
                }
                _ = signal::ctrl_c() => {
                    log::info!("received shutdown signal");
                    return Ok(());
                }
            }
        }
    } else {
        log::warn!("no --tls-cert/--tls-key given; serving this node's client socket in plaintext");
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (mut stream, _) = accepted?;
                    let state = state.clone();
                    tokio::spawn(async move { serve_connection(&mut stream, &state).await });
                }
                _ = signal::ctrl_c() => {
                    log::info!("received shutdown signal");
                    return Ok(());
                }
            }
        }
    }
}

/// This node's own worker pool moves one port above the central listener when
/// the two share a process, so both can bind concurrently.
fn derive_worker_bind(bind: &str) -> String {
    match bind.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(p) => format!("{host}:{}", p.wrapping_add(1)),
            Err(_) => format!("{bind}1"),
        },
        None => format!("{bind}1"),
    }
}

/// Serve requests on one connection until the client disconnects or a request
/// fails to even parse: `Idle -> Serving -> Reporting -> Idle`, looped until the
/// socket closes.
async fn serve_connection<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S, state: &WorkerState) {
    loop {
        match loadit_node::cluster::worker::serve_one(stream, state).await {
            Ok(report) => {
                log::info!(
                    "release: database={} bytes_in={} bytes_out={} is_error={}",
                    report.database,
                    report.bytes_in,
                    report.bytes_out,
                    report.is_error
                );
            }
            Err(e) => {
                log::warn!("connection closed: {e}");
                return;
            }
        }
    }
}

fn start_central() -> LoaditResult<Arc<Central>> {
    let master_key = generate_master_key();
    Ok(Arc::new(Central::new(master_key)))
}

/// `start-node`'s interactive user+password prompt. Only the central
/// process actually consults these credentials (they unlock its session
/// store); a plain worker still collects them so an operator typing
/// `start-node` against a remote central sees the same prompt either way.
fn prompt_login() -> (String, String) {
    let mut user = String::new();
    print!("user: ");
    let _ = io::stdout().flush();
    io::stdin().read_line(&mut user).expect("failed to read username");

    let password = read_password();
    (user.trim().to_owned(), password)
}

fn read_password() -> String {
    let mut password = String::new();
    print!("password: ");
    let _ = io::stdout().flush();
    io::stdin().read_line(&mut password).expect("failed to read password");
    password.trim().to_owned()
}

fn generate_master_key() -> Vec<u8> {
    use sha2::{Digest, Sha256};
    let seed = format!("{:?}-{}", std::time::SystemTime::now(), process::id());
    Sha256::digest(seed.as_bytes()).to_vec()
}

/// Refuse to start a second node against a data directory a live process is
/// already using, the same way the teacher's `.sky_pid` lock does.
fn run_pre_startup_tasks() -> fs::File {
    let path = Path::new(PID_FILE);
    if path.exists() {
        let pid = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_owned());
        eprintln!("startup failure: another process (PID {pid}) appears to be running here");
        process::exit(1);
    }
    let mut file = fs::OpenOptions::new().create(true).write(true).truncate(true).open(path).unwrap_or_else(|e| {
        eprintln!("startup failure: failed to open PID file: {e}");
        process::exit(1);
    });
    if let Err(e) = file.write_all(process::id().to_string().as_bytes()) {
        eprintln!("startup failure: failed to write PID file: {e}");
        process::exit(1);
    }
    file
}
