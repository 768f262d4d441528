//! Encrypted file payloads.
//!
//! Data files shared through the broadcast channel are sealed with
//! XChaCha20-Poly1305 under a key shared by the bot family; the
//! receiving siblings open them with the same key. The output layout is
//! `nonce || ciphertext+tag`; the 24-byte nonce is drawn from OS
//! entropy per file and must never be reused with the same key.

use std::path::Path;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use rand::rngs::OsRng;
use thiserror::Error;

/// Byte length of the shared exchange key.
pub const KEY_LEN: usize = 32;

/// Byte length of the XChaCha20-Poly1305 nonce prefix.
pub const NONCE_LEN: usize = 24;

/// Errors that can occur while sealing a payload file.
#[derive(Debug, Error)]
pub enum CryptError {
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encryption failed")]
    Encrypt,
}

/// Encrypts `src` to `dst` under the shared exchange key.
pub async fn encrypt_file(key: &[u8; KEY_LEN], src: &Path, dst: &Path) -> Result<(), CryptError> {
    let plain = tokio::fs::read(src).await?;

    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let sealed = cipher
        .encrypt(XNonce::from_slice(&nonce), plain.as_slice())
        .map_err(|_| CryptError::Encrypt)?;

    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);

    tokio::fs::write(dst, out).await?;
    Ok(())
}
