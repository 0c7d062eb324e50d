//! Incremental AES-256-GCM built from its two halves
//!
//! GCM = CTR keystream (counter starts at IV ∥ 2) + GHASH over the
//! ciphertext, masked with AES_K(IV ∥ 1). The one-shot `aes-gcm` crate needs
//! the whole message in memory, so the halves are driven chunk by chunk here:
//!
//! ```text
//! seal:  plaintext  ─► GcmKeystream ─► ciphertext ─► GcmAuthenticator ─► tag
//! open:  ciphertext ─► GcmAuthenticator ─► verify(tag) ─► GcmKeystream ─► plaintext
//! ```
//!
//! Output is byte-identical to `aes_gcm::Aes256Gcm` with a 96-bit nonce and
//! empty AAD.

use aes::cipher::{
    generic_array::GenericArray, BlockEncrypt, KeyInit, KeyIvInit, StreamCipher,
};
use aes::Aes256;
use ghash::{universal_hash::UniversalHash, GHash};
use subtle::ConstantTimeEq;

use crate::error::CipherError;
use crate::kdf::FrameKey;
use crate::{IV_LEN, TAG_LEN};

type Aes256Ctr32 = ctr::Ctr32BE<Aes256>;

const BLOCK: usize = 16;

/// Build the keystream and authenticator halves for one frame.
pub fn stages(key: &FrameKey, iv: &[u8; IV_LEN]) -> (GcmKeystream, GcmAuthenticator) {
    let aes = Aes256::new(GenericArray::from_slice(key.as_bytes()));

    let mut h = GenericArray::default();
    aes.encrypt_block(&mut h);

    let mut j0 = [0u8; BLOCK];
    j0[..IV_LEN].copy_from_slice(iv);
    j0[BLOCK - 1] = 1;
    let mut tag_mask = GenericArray::clone_from_slice(&j0);
    aes.encrypt_block(&mut tag_mask);

    let mut counter = j0;
    counter[BLOCK - 1] = 2;
    let ctr = Aes256Ctr32::new(
        GenericArray::from_slice(key.as_bytes()),
        GenericArray::from_slice(&counter),
    );

    let keystream = GcmKeystream { ctr };
    let auth = GcmAuthenticator {
        ghash: GHash::new(&h),
        tag_mask: tag_mask.into(),
        pending: [0u8; BLOCK],
        pending_len: 0,
        len: 0,
    };
    (keystream, auth)
}

/// CTR half: XORs the keystream into a buffer in place.
pub struct GcmKeystream {
    ctr: Aes256Ctr32,
}

impl GcmKeystream {
    pub fn process(&mut self, buf: &mut [u8]) -> Result<(), CipherError> {
        self.ctr
            .try_apply_keystream(buf)
            .map_err(|_| CipherError::Oversize)
    }
}

/// GHASH half: absorbs ciphertext in arbitrary-sized pieces.
pub struct GcmAuthenticator {
    ghash: GHash,
    tag_mask: [u8; TAG_LEN],
    pending: [u8; BLOCK],
    pending_len: usize,
    len: u64,
}

impl GcmAuthenticator {
    pub fn absorb(&mut self, mut data: &[u8]) {
        self.len += data.len() as u64;

        if self.pending_len > 0 {
            let take = (BLOCK - self.pending_len).min(data.len());
            self.pending[self.pending_len..self.pending_len + take].copy_from_slice(&data[..take]);
            self.pending_len += take;
            data = &data[take..];
            if self.pending_len < BLOCK {
                return;
            }
            self.ghash.update_padded(&self.pending);
            self.pending_len = 0;
        }

        let full = data.len() - data.len() % BLOCK;
        if full > 0 {
            self.ghash.update_padded(&data[..full]);
        }
        let rest = &data[full..];
        self.pending[..rest.len()].copy_from_slice(rest);
        self.pending_len = rest.len();
    }

    /// Ciphertext bytes absorbed so far
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Close GHASH and produce the tag.
    pub fn finish(mut self) -> [u8; TAG_LEN] {
        if self.pending_len > 0 {
            self.ghash.update_padded(&self.pending[..self.pending_len]);
        }

        // len(AAD) = 0, len(C) in bits
        let mut lengths = [0u8; BLOCK];
        lengths[8..].copy_from_slice(&(self.len * 8).to_be_bytes());
        self.ghash.update_padded(&lengths);

        let s = self.ghash.finalize();
        let mut tag = [0u8; TAG_LEN];
        for (i, byte) in tag.iter_mut().enumerate() {
            *byte = s[i] ^ self.tag_mask[i];
        }
        tag
    }

    /// Compare against a received tag in constant time.
    pub fn verify(self, received: &[u8]) -> Result<(), CipherError> {
        if received.len() != TAG_LEN {
            return Err(CipherError::Authentication);
        }
        let expected = self.finish();
        if bool::from(expected[..].ct_eq(received)) {
            Ok(())
        } else {
            Err(CipherError::Authentication)
        }
    }
}

/// Encrypting transform: `process` turns plaintext chunks into ciphertext in
/// place, `finish` yields the tag.
pub struct GcmSealer {
    keystream: GcmKeystream,
    auth: GcmAuthenticator,
}

impl GcmSealer {
    pub fn new(key: &FrameKey, iv: &[u8; IV_LEN]) -> Self {
        let (keystream, auth) = stages(key, iv);
        Self { keystream, auth }
    }

    pub fn process(&mut self, buf: &mut [u8]) -> Result<(), CipherError> {
        self.keystream.process(buf)?;
        self.auth.absorb(buf);
        Ok(())
    }

    pub fn finish(self) -> [u8; TAG_LEN] {
        self.auth.finish()
    }
}
