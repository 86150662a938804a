//! AES block cipher (FIPS 197) behind the provider [`BlockCipher`] trait.

use crate::provider::BlockCipher;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use litetls_types::CryptoError;

/// AES block size in bytes.
pub const AES_BLOCK_SIZE: usize = 16;

enum AesInner {
    Aes128(aes::Aes128),
    Aes256(aes::Aes256),
}

/// An AES key schedule.
pub struct AesKey {
    inner: AesInner,
    key_len: usize,
}

impl AesKey {
    /// Create a new AES key. Accepts 16-byte and 32-byte keys.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let inner = match key.len() {
            16 => AesInner::Aes128(
                aes::Aes128::new_from_slice(key).map_err(|_| CryptoError::InvalidKey)?,
            ),
            32 => AesInner::Aes256(
                aes::Aes256::new_from_slice(key).map_err(|_| CryptoError::InvalidKey)?,
            ),
            got => {
                return Err(CryptoError::InvalidKeyLength {
                    expected: 16,
                    got,
                })
            }
        };
        Ok(Self {
            inner,
            key_len: key.len(),
        })
    }
}

impl BlockCipher for AesKey {
    fn block_size(&self) -> usize {
        AES_BLOCK_SIZE
    }

    fn key_size(&self) -> usize {
        self.key_len
    }

    fn encrypt_block(&self, block: &mut [u8]) -> Result<(), CryptoError> {
        if block.len() != AES_BLOCK_SIZE {
            return Err(CryptoError::InvalidBlockLength);
        }
        let block = GenericArray::from_mut_slice(block);
        match &self.inner {
            AesInner::Aes128(c) => c.encrypt_block(block),
            AesInner::Aes256(c) => c.encrypt_block(block),
        }
        Ok(())
    }

    fn decrypt_block(&self, block: &mut [u8]) -> Result<(), CryptoError> {
        if block.len() != AES_BLOCK_SIZE {
            return Err(CryptoError::InvalidBlockLength);
        }
        let block = GenericArray::from_mut_slice(block);
        match &self.inner {
            AesInner::Aes128(c) => c.decrypt_block(block),
            AesInner::Aes256(c) => c.decrypt_block(block),
        }
        Ok(())
    }
}
