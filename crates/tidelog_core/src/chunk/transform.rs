//! At-rest transforms for completed chunk data.
//!
//! A transform rewrites a chunk's data region when the chunk is written
//! out-of-place (by a scavenge or merge). The header stays plaintext so
//! a reader can always discover which transform to invert. Writable tail
//! chunks are never transformed; record offsets must stay byte-addressable
//! while the chunk is being appended to.
//!
//! With the `encryption` feature, [`AesGcmTransform`] encrypts the data
//! region with AES-256-GCM. The region is sealed as a single message:
//! `nonce (12 bytes) || ciphertext || tag (16 bytes)`. A per-chunk key is
//! derived from the master key and the chunk id via HKDF-SHA256, so nonce
//! reuse across chunks is not a concern.

use crate::error::{CoreError, CoreResult};
use std::sync::Arc;
use uuid::Uuid;

/// Identifies a transform in a chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransformId {
    /// Data stored as-is.
    Identity = 0,
    /// Data region encrypted with AES-256-GCM.
    AesGcm = 1,
}

impl TransformId {
    /// Byte written into the chunk header.
    #[must_use]
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parses a header byte.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Identity),
            1 => Some(Self::AesGcm),
            _ => None,
        }
    }
}

/// A reversible rewrite of a chunk's data region.
pub trait ChunkTransform: Send + Sync {
    /// Id recorded in chunk headers.
    fn id(&self) -> TransformId;

    /// Transforms a plaintext data region into its stored form.
    ///
    /// `chunk_id` is the id of the chunk being written; transforms may
    /// bind their output to it.
    fn apply(&self, chunk_id: Uuid, plain: &[u8]) -> CoreResult<Vec<u8>>;

    /// Recovers the plaintext data region from its stored form.
    fn invert(&self, chunk_id: Uuid, stored: &[u8]) -> CoreResult<Vec<u8>>;
}

/// The no-op transform.
#[derive(Debug, Default)]
pub struct IdentityTransform;

impl ChunkTransform for IdentityTransform {
    fn id(&self) -> TransformId {
        TransformId::Identity
    }

    fn apply(&self, _chunk_id: Uuid, plain: &[u8]) -> CoreResult<Vec<u8>> {
        Ok(plain.to_vec())
    }

    fn invert(&self, _chunk_id: Uuid, stored: &[u8]) -> CoreResult<Vec<u8>> {
        Ok(stored.to_vec())
    }
}

/// The transforms known to a database instance.
///
/// The identity transform is always registered. Reading a chunk whose
/// header names an unregistered transform is an error; writing always
/// uses the active transform.
pub struct TransformSet {
    active: Arc<dyn ChunkTransform>,
    registered: Vec<Arc<dyn ChunkTransform>>,
}

impl TransformSet {
    /// A set containing only the identity transform, which is active.
    #[must_use]
    pub fn identity() -> Self {
        let identity: Arc<dyn ChunkTransform> = Arc::new(IdentityTransform);
        Self {
            active: Arc::clone(&identity),
            registered: vec![identity],
        }
    }

    /// Registers `transform` and makes it the active one for new
    /// out-of-place chunk writes.
    #[must_use]
    pub fn with_active(mut self, transform: Arc<dyn ChunkTransform>) -> Self {
        self.active = Arc::clone(&transform);
        self.registered.push(transform);
        self
    }

    /// The transform used for new out-of-place chunk writes.
    #[must_use]
    pub fn active(&self) -> Arc<dyn ChunkTransform> {
        Arc::clone(&self.active)
    }

    /// Looks up a transform named in a chunk header.
    pub fn get(&self, id: TransformId) -> CoreResult<Arc<dyn ChunkTransform>> {
        self.registered
            .iter()
            .find(|t| t.id() == id)
            .cloned()
            .ok_or_else(|| {
                CoreError::invalid_operation(format!(
                    "chunk requires unregistered transform {id:?}"
                ))
            })
    }
}

impl Default for TransformSet {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::fmt::Debug for TransformSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformSet")
            .field("active", &self.active.id())
            .field("registered", &self.registered.iter().map(|t| t.id()).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(feature = "encryption")]
pub use aes::{AesGcmTransform, EncryptionKey, KEY_SIZE};

#[cfg(feature = "encryption")]
mod aes {
    use super::{ChunkTransform, TransformId};
    use crate::error::{CoreError, CoreResult};
    use aes_gcm::aead::{Aead, KeyInit, Payload};
    use aes_gcm::{Aes256Gcm, Nonce};
    use hkdf::Hkdf;
    use rand::RngCore;
    use sha2::Sha256;
    use uuid::Uuid;
    use zeroize::Zeroize;

    /// Size of the AES-256 master key in bytes.
    pub const KEY_SIZE: usize = 32;
    /// Size of the GCM nonce in bytes.
    const NONCE_SIZE: usize = 12;
    /// Size of the GCM authentication tag in bytes.
    const TAG_SIZE: usize = 16;

    /// Master key for chunk encryption. Zeroized on drop.
    #[derive(Clone)]
    pub struct EncryptionKey {
        bytes: [u8; KEY_SIZE],
    }

    impl EncryptionKey {
        /// Creates a key from raw bytes.
        ///
        /// # Errors
        ///
        /// Returns an error if the slice is not exactly 32 bytes.
        pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
            if bytes.len() != KEY_SIZE {
                return Err(CoreError::invalid_argument(format!(
                    "invalid key size: expected {KEY_SIZE}, got {}",
                    bytes.len()
                )));
            }
            let mut key_bytes = [0u8; KEY_SIZE];
            key_bytes.copy_from_slice(bytes);
            Ok(Self { bytes: key_bytes })
        }
    }

    impl Drop for EncryptionKey {
        fn drop(&mut self) {
            self.bytes.zeroize();
        }
    }

    impl std::fmt::Debug for EncryptionKey {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("EncryptionKey")
                .field("bytes", &"[REDACTED]")
                .finish()
        }
    }

    /// AES-256-GCM chunk transform.
    ///
    /// Each chunk's data region is sealed as one message under a key
    /// derived from the master key and the chunk id.
    pub struct AesGcmTransform {
        master: EncryptionKey,
    }

    impl AesGcmTransform {
        /// Creates a transform from a master key.
        #[must_use]
        pub fn new(master: EncryptionKey) -> Self {
            Self { master }
        }

        fn chunk_cipher(&self, chunk_id: Uuid) -> CoreResult<Aes256Gcm> {
            let hk = Hkdf::<Sha256>::new(Some(chunk_id.as_bytes()), &self.master.bytes);
            let mut derived = [0u8; KEY_SIZE];
            hk.expand(b"tidelog chunk key", &mut derived)
                .map_err(|_| CoreError::invalid_operation("key derivation failed"))?;
            let cipher = Aes256Gcm::new_from_slice(&derived)
                .map_err(|_| CoreError::invalid_operation("invalid derived key"))?;
            derived.zeroize();
            Ok(cipher)
        }
    }

    impl std::fmt::Debug for AesGcmTransform {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("AesGcmTransform").finish_non_exhaustive()
        }
    }

    impl ChunkTransform for AesGcmTransform {
        fn id(&self) -> TransformId {
            TransformId::AesGcm
        }

        fn apply(&self, chunk_id: Uuid, plain: &[u8]) -> CoreResult<Vec<u8>> {
            let cipher = self.chunk_cipher(chunk_id)?;
            let mut nonce_bytes = [0u8; NONCE_SIZE];
            rand::thread_rng().fill_bytes(&mut nonce_bytes);
            let nonce = Nonce::from_slice(&nonce_bytes);

            let sealed = cipher
                .encrypt(
                    nonce,
                    Payload {
                        msg: plain,
                        aad: chunk_id.as_bytes(),
                    },
                )
                .map_err(|_| CoreError::invalid_operation("chunk encryption failed"))?;

            let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
            out.extend_from_slice(&nonce_bytes);
            out.extend_from_slice(&sealed);
            Ok(out)
        }

        fn invert(&self, chunk_id: Uuid, stored: &[u8]) -> CoreResult<Vec<u8>> {
            if stored.len() < NONCE_SIZE + TAG_SIZE {
                return Err(CoreError::chunk_corruption(
                    "encrypted chunk data too short",
                ));
            }
            let cipher = self.chunk_cipher(chunk_id)?;
            let nonce = Nonce::from_slice(&stored[..NONCE_SIZE]);
            cipher
                .decrypt(
                    nonce,
                    Payload {
                        msg: &stored[NONCE_SIZE..],
                        aad: chunk_id.as_bytes(),
                    },
                )
                .map_err(|_| {
                    CoreError::chunk_corruption("chunk authentication failed")
                })
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_a_noop() {
        let t = IdentityTransform;
        let id = Uuid::new_v4();
        let data = vec![1u8, 2, 3];
        assert_eq!(t.apply(id, &data).unwrap(), data);
        assert_eq!(t.invert(id, &data).unwrap(), data);
    }

    #[test]
    fn transform_id_bytes() {
        assert_eq!(TransformId::from_byte(0), Some(TransformId::Identity));
        assert_eq!(TransformId::from_byte(1), Some(TransformId::AesGcm));
        assert_eq!(TransformId::from_byte(9), None);
        assert_eq!(TransformId::AesGcm.as_byte(), 1);
    }

    #[test]
    fn set_rejects_unregistered() {
        let set = TransformSet::identity();
        assert!(set.get(TransformId::AesGcm).is_err());
        assert_eq!(set.active().id(), TransformId::Identity);
    }
}
