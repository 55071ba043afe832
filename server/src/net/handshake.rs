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

//! The optional pre-TLS ECDH handshake. This predates the node's
//! adoption of TLS for the client socket and is kept only for deployments that
//! still script against it; TLS remains the transport either way, so this layer
//! buys nothing for a fresh deployment beyond wire-compatibility with old clients.
//! New clients should leave it disabled.
//!
//! Wire shape: each side sends its P-256 public key PEM, both derive the shared
//! point, and HKDF-SHA256 over the shared secret (with a fixed info string) yields
//! a 256-bit key for AES-256-GCM, which then wraps every frame payload exchanged
//! for the rest of the connection.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hkdf::Hkdf;
use libsky::error::{LoaditError, LoaditResult};
use p256::ecdh::EphemeralSecret;
use p256::PublicKey;
use sha2::Sha256;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const HKDF_INFO: &[u8] = b"loadit-handshake-v1";
const NONCE_LEN: usize = 12;

pub struct SessionKey(Aes256Gcm);

impl SessionKey {
    pub fn seal(&self, nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> LoaditResult<Vec<u8>> {
        self.0
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|e| LoaditError::Protocol(format!("handshake seal failed: {e}")))
    }

    pub fn open(&self, nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> LoaditResult<Vec<u8>> {
        self.0
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| LoaditError::Protocol(format!("handshake open failed: {e}")))
    }
}

async fn write_pem<W: AsyncWrite + Unpin>(w: &mut W, pem: &str) -> LoaditResult<()> {
    let bytes = pem.as_bytes();
    w.write_all(&(bytes.len() as u32).to_le_bytes()).await?;
    w.write_all(bytes).await?;
    w.flush().await?;
    Ok(())
}

async fn read_pem<R: AsyncRead + Unpin>(r: &mut R) -> LoaditResult<String> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|e| LoaditError::Protocol(format!("non-utf8 handshake key: {e}")))
}

fn derive_key(shared_secret: &[u8]) -> SessionKey {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut okm = [0u8; 32];
    hk.expand(HKDF_INFO, &mut okm).expect("32 is a valid okm length for HKDF-SHA256");
    let key = Key::<Aes256Gcm>::from_slice(&okm);
    SessionKey(Aes256Gcm::new(key))
}

/// Server side: send our ephemeral public key, receive the peer's, derive the
/// shared session key.
pub async fn server_handshake<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S) -> LoaditResult<SessionKey> {
    let secret = EphemeralSecret::random(&mut rand_core::OsRng);
    let public_pem = public_key_to_pem(&secret)?;
    write_pem(stream, &public_pem).await?;
    let peer_pem = read_pem(stream).await?;
    let peer_public = parse_public_pem(&peer_pem)?;
    let shared = secret.diffie_hellman(&peer_public);
    Ok(derive_key(shared.raw_secret_bytes()))
}

/// Client side: receive the server's ephemeral public key, send ours, derive the
/// shared session key.
pub async fn client_handshake<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S) -> LoaditResult<SessionKey> {
    let peer_pem = read_pem(stream).await?;
    let peer_public = parse_public_pem(&peer_pem)?;
    let secret = EphemeralSecret::random(&mut rand_core::OsRng);
    let public_pem = public_key_to_pem(&secret)?;
    write_pem(stream, &public_pem).await?;
    let shared = secret.diffie_hellman(&peer_public);
    Ok(derive_key(shared.raw_secret_bytes()))
}

fn public_key_to_pem(secret: &EphemeralSecret) -> LoaditResult<String> {
    use p256::pkcs8::EncodePublicKey;
    secret
        .public_key()
        .to_public_key_pem(p256::pkcs8::LineEnding::LF)
        .map_err(|e| LoaditError::Protocol(format!("failed to encode handshake public key: {e}")))
}

fn parse_public_pem(pem: &str) -> LoaditResult<PublicKey> {
    use p256::pkcs8::DecodePublicKey;
    PublicKey::from_public_key_pem(pem).map_err(|e| LoaditError::Protocol(format!("bad handshake public key: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn handshake_derives_matching_keys() {
        let (mut a, mut b) = duplex(4096);
        let (server_key, client_key) = tokio::join!(server_handshake(&mut a), client_handshake(&mut b));
        let server_key = server_key.unwrap();
        let client_key = client_key.unwrap();

        let nonce = [7u8; NONCE_LEN];
        let ciphertext = server_key.seal(&nonce, b"hello worker").unwrap();
        let plaintext = client_key.open(&nonce, &ciphertext).unwrap();
        assert_eq!(plaintext, b"hello worker".to_vec());
    }
}
