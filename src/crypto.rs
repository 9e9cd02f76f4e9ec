//! # Payload Encryption Framing
//!
//! Optional encryption of the payload portion of a frame (the 4-byte header
//! always travels in the clear, receivers need it for address filtering).
//!
//! The cipher itself is an external collaborator supplied through the
//! [`BlockCipher`] trait; this module only owns the framing around it: a
//! one-byte plaintext length, the plaintext, then zero padding up to the next
//! block boundary.
//!
//! ```text
//! plaintext:  [len u8] [plaintext bytes] [0x00 padding]  -> encrypt
//! ciphertext: decrypt -> first byte is len -> next len bytes are the message
//! ```
//!
//! A receiver treats a message as ciphertext when a cipher is configured and
//! the message length is an exact multiple of the cipher block size. This is
//! a heuristic carried over from the wire format: a block-aligned plaintext
//! from a peer without encryption will be mis-detected. See DESIGN.md.
//!
//! With the `crypto` feature enabled, [`Aes128Ecb`] provides a ready-made
//! AES-128-ECB collaborator that interoperates with RadioHead-style nodes
//! using a raw AES block cipher.

use thiserror::Error;

/// Errors from the encryption framing layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The plaintext length does not fit the one-byte length prefix.
    #[error("Plaintext of {len} bytes does not fit the one-byte length prefix")]
    PlaintextTooLong { len: usize },

    /// A supplied key has the wrong length for the cipher.
    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// A hex-encoded key could not be decoded.
    #[error("Invalid hex in key material")]
    InvalidHexKey,
}

/// An externally supplied block cipher.
///
/// `encrypt` and `decrypt` operate on block-aligned input; the framing in
/// this module guarantees alignment before calling them. Implementations are
/// shared between the foreground thread and the interrupt context, hence the
/// `Send + Sync` bound.
pub trait BlockCipher: Send + Sync {
    /// Cipher block size in bytes.
    fn block_len(&self) -> usize;

    /// Encrypt block-aligned data.
    fn encrypt(&self, data: &[u8]) -> Vec<u8>;

    /// Decrypt block-aligned data.
    fn decrypt(&self, data: &[u8]) -> Vec<u8>;
}

/// Frame and encrypt a plaintext: length prefix, zero-pad to the block size,
/// encrypt the whole buffer.
pub fn encrypt_frame(cipher: &dyn BlockCipher, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if plaintext.len() > u8::MAX as usize {
        return Err(CryptoError::PlaintextTooLong {
            len: plaintext.len(),
        });
    }
    let block = cipher.block_len();
    let padded_len = (plaintext.len() + 1).div_ceil(block) * block;
    let mut buf = Vec::with_capacity(padded_len);
    buf.push(plaintext.len() as u8);
    buf.extend_from_slice(plaintext);
    buf.resize(padded_len, 0);
    Ok(cipher.encrypt(&buf))
}

/// Decrypt and unframe a ciphertext, discarding the padding.
///
/// Returns `None` when the decrypted length prefix is inconsistent with the
/// buffer, which is how a block-aligned plaintext mis-detected as ciphertext
/// usually manifests.
pub fn decrypt_frame(cipher: &dyn BlockCipher, ciphertext: &[u8]) -> Option<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % cipher.block_len() != 0 {
        return None;
    }
    let decrypted = cipher.decrypt(ciphertext);
    let len = *decrypted.first()? as usize;
    if decrypted.len() < 1 + len {
        return None;
    }
    Some(decrypted[1..1 + len].to_vec())
}

/// AES-128 in ECB mode, the usual pairing for this framing.
#[cfg(feature = "crypto")]
pub struct Aes128Ecb {
    cipher: aes::Aes128,
}

#[cfg(feature = "crypto")]
impl Aes128Ecb {
    /// Create from a raw 16-byte key.
    pub fn new(key: &[u8; 16]) -> Self {
        use aes::cipher::KeyInit;
        Self {
            cipher: aes::Aes128::new(key.into()),
        }
    }

    /// Create from a 32-character hex-encoded key.
    pub fn from_hex(key: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(key).map_err(|_| CryptoError::InvalidHexKey)?;
        let key: [u8; 16] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: 16,
                actual: bytes.len(),
            })?;
        Ok(Self::new(&key))
    }
}

#[cfg(feature = "crypto")]
impl BlockCipher for Aes128Ecb {
    fn block_len(&self) -> usize {
        16
    }

    fn encrypt(&self, data: &[u8]) -> Vec<u8> {
        use aes::cipher::{generic_array::GenericArray, BlockEncrypt};
        let mut out = Vec::with_capacity(data.len());
        for chunk in data.chunks_exact(16) {
            let mut block = GenericArray::clone_from_slice(chunk);
            self.cipher.encrypt_block(&mut block);
            out.extend_from_slice(&block);
        }
        out
    }

    fn decrypt(&self, data: &[u8]) -> Vec<u8> {
        use aes::cipher::{generic_array::GenericArray, BlockDecrypt};
        let mut out = Vec::with_capacity(data.len());
        for chunk in data.chunks_exact(16) {
            let mut block = GenericArray::clone_from_slice(chunk);
            self.cipher.decrypt_block(&mut block);
            out.extend_from_slice(&block);
        }
        out
    }
}
