/*
 * Created on Fri Dec 18 2020
 *
 * This file is a part of TerrabaseDB
 * Copyright (c) 2020, Sayan Nandan <ohsayan at outlook dot com>
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

//! TLS-wrapped listener for a node's client-facing socket. Trust is self-signed;
//! the acceptor backs off exponentially on transient accept errors rather than
//! spinning.

use libsky::error::{LoaditError, LoaditResult};
use openssl::ssl::{SslAcceptor, SslFiletype, SslMethod};
use std::{sync::Arc, time::Duration};
use tokio::net::{TcpListener, TcpStream};
use tokio::time;
use tokio_openssl::SslStream;

pub struct TlsListener {
    listener: TcpListener,
    acceptor: Arc<SslAcceptor>,
}

impl TlsListener {
    pub fn new_pem_based(
        key_file: &std::path::Path,
        chain_file: &std::path::Path,
        listener: TcpListener,
    ) -> LoaditResult<Self> {
        let mut acceptor = SslAcceptor::mozilla_intermediate(SslMethod::tls())?;
        acceptor.set_private_key_file(key_file, SslFiletype::PEM)?;
        acceptor.set_certificate_chain_file(chain_file)?;
        let acceptor = Arc::new(acceptor.build());
        Ok(Self { listener, acceptor })
    }

    pub async fn accept(&self) -> LoaditResult<SslStream<TcpStream>> {
        let mut backoff = 1;
        loop {
            match self.listener.accept().await {
                Ok((stream, _)) => {
                    let ssl = openssl::ssl::Ssl::new(self.acceptor.context())?;
                    let mut decrypted = SslStream::new(ssl, stream)
                        .map_err(|e| LoaditError::Other(format!("TLS setup error: {e}")))?;
                    std::pin::Pin::new(&mut decrypted)
                        .accept()
                        .await
                        .map_err(|e| LoaditError::Other(format!("TLS accept error: {e}")))?;
                    return Ok(decrypted);
                }
                Err(e) => {
                    if backoff > 64 {
                        return Err(e.into());
                    }
                }
            }
            time::sleep(Duration::from_secs(backoff)).await;
            backoff *= 2;
        }
    }
}
