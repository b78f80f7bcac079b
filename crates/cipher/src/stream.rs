//! Chunk-at-a-time AES-256-CBC.
//!
//! CBC chains every block to the one before it, so a stream split into
//! arbitrary chunks must carry both the chaining state and any partial block
//! from one call to the next. [`StreamCipher`] does that. PKCS7 padding is
//! applied (or checked) once, in [`StreamCipher::finalize`], so the stored
//! artifact is byte-identical to a one-shot encryption of the whole file.

use crate::error::{CipherError, CipherResult};
use crate::key::CipherKey;
use crate::metadata::CipherMetadata;
use crate::{BLOCK_SIZE, IV_LEN};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

enum Direction {
    Encrypt(Aes256CbcEnc),
    Decrypt(Aes256CbcDec),
}

/// Incremental CBC encryptor or decryptor.
///
/// `update` may be called any number of times with chunks of any length.
/// `finalize` takes `self`, so padding is handled exactly once.
pub struct StreamCipher {
    direction: Direction,
    /// Bytes not yet processed: a partial block, plus the last full block
    /// when decrypting because it may hold the padding.
    pending: Vec<u8>,
}

impl StreamCipher {
    pub fn encryptor(key: &CipherKey, iv: &[u8; IV_LEN]) -> Self {
        let cipher = Aes256CbcEnc::new(&(*key.as_bytes()).into(), &(*iv).into());
        Self {
            direction: Direction::Encrypt(cipher),
            pending: Vec::with_capacity(BLOCK_SIZE * 2),
        }
    }

    pub fn decryptor(key: &CipherKey, iv: &[u8; IV_LEN]) -> Self {
        let cipher = Aes256CbcDec::new(&(*key.as_bytes()).into(), &(*iv).into());
        Self {
            direction: Direction::Decrypt(cipher),
            pending: Vec::with_capacity(BLOCK_SIZE * 2),
        }
    }

    /// Process a chunk, returning every output block that is ready.
    pub fn update(&mut self, chunk: &[u8]) -> CipherResult<Vec<u8>> {
        self.pending.extend_from_slice(chunk);

        let ready = match self.direction {
            Direction::Encrypt(_) => self.pending.len() / BLOCK_SIZE * BLOCK_SIZE,
            Direction::Decrypt(_) => {
                let aligned = self.pending.len() / BLOCK_SIZE * BLOCK_SIZE;
                if aligned == self.pending.len() {
                    aligned.saturating_sub(BLOCK_SIZE)
                } else {
                    aligned
                }
            }
        };
        if ready == 0 {
            return Ok(Vec::new());
        }

        let rest = self.pending.split_off(ready);
        let mut out = std::mem::replace(&mut self.pending, rest);
        self.apply_blocks(&mut out);
        Ok(out)
    }

    /// Process the final chunk and pad (encrypt) or unpad (decrypt).
    pub fn finalize(mut self, last_chunk: &[u8]) -> CipherResult<Vec<u8>> {
        let mut out = self.update(last_chunk)?;

        match self.direction {
            Direction::Encrypt(ref mut cipher) => {
                let pad = (BLOCK_SIZE - self.pending.len()) as u8;
                let mut block = std::mem::take(&mut self.pending);
                block.resize(BLOCK_SIZE, pad);
                cipher.encrypt_block_mut(GenericArray::from_mut_slice(&mut block));
                out.extend_from_slice(&block);
            }
            Direction::Decrypt(ref mut cipher) => {
                if self.pending.len() != BLOCK_SIZE {
                    return Err(CipherError::Decryption(
                        "ciphertext is empty or not a multiple of the block size".to_string(),
                    ));
                }
                let mut block = std::mem::take(&mut self.pending);
                cipher.decrypt_block_mut(GenericArray::from_mut_slice(&mut block));
                let pad = usize::from(block[BLOCK_SIZE - 1]);
                let valid = (1..=BLOCK_SIZE).contains(&pad)
                    && block[BLOCK_SIZE - pad..]
                        .iter()
                        .all(|b| usize::from(*b) == pad);
                if !valid {
                    return Err(CipherError::Decryption("invalid padding".to_string()));
                }
                out.extend_from_slice(&block[..BLOCK_SIZE - pad]);
            }
        }

        Ok(out)
    }

    fn apply_blocks(&mut self, data: &mut [u8]) {
        match &mut self.direction {
            Direction::Encrypt(cipher) => {
                for block in data.chunks_exact_mut(BLOCK_SIZE) {
                    cipher.encrypt_block_mut(GenericArray::from_mut_slice(block));
                }
            }
            Direction::Decrypt(cipher) => {
                for block in data.chunks_exact_mut(BLOCK_SIZE) {
                    cipher.decrypt_block_mut(GenericArray::from_mut_slice(block));
                }
            }
        }
    }
}

/// Ciphertext length for `plain_len` bytes of plaintext.
pub fn padded_len(plain_len: u64) -> u64 {
    (plain_len / BLOCK_SIZE as u64 + 1) * BLOCK_SIZE as u64
}

/// One-shot encryption with PKCS7 padding.
pub fn encrypt_bytes(key: &CipherKey, iv: &[u8; IV_LEN], plaintext: &[u8]) -> Vec<u8> {
    Aes256CbcEnc::new(&(*key.as_bytes()).into(), &(*iv).into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// One-shot decryption with PKCS7 unpadding.
pub fn decrypt_bytes(
    key: &CipherKey,
    iv: &[u8; IV_LEN],
    ciphertext: &[u8],
) -> CipherResult<Vec<u8>> {
    Aes256CbcDec::new(&(*key.as_bytes()).into(), &(*iv).into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CipherError::Decryption("invalid padding".to_string()))
}

/// Encrypt under a password, returning the ciphertext and the metadata needed
/// to decrypt it.
pub fn encrypt_with_password(
    password: &str,
    plaintext: &[u8],
    kdf_iterations: u32,
) -> CipherResult<(Vec<u8>, CipherMetadata)> {
    let metadata = CipherMetadata::for_password(kdf_iterations);
    let key = metadata.derive_key(password)?;
    Ok((encrypt_bytes(&key, &metadata.iv, plaintext), metadata))
}

/// Decrypt data produced by [`encrypt_with_password`] or a password-encrypted upload.
pub fn decrypt_with_password(
    password: &str,
    ciphertext: &[u8],
    metadata: &CipherMetadata,
) -> CipherResult<Vec<u8>> {
    let key = metadata.derive_key(password)?;
    decrypt_bytes(&key, &metadata.iv, ciphertext)
}

/// Decrypt `reader` into `writer` holding at most one chunk in memory.
///
/// Returns the number of plaintext bytes written.
#[tracing::instrument(skip(reader, writer, key, iv))]
pub async fn decrypt_stream<R, W>(
    mut reader: R,
    mut writer: W,
    key: &CipherKey,
    iv: &[u8; IV_LEN],
    chunk_size: usize,
) -> CipherResult<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut cipher = StreamCipher::decryptor(key, iv);
    let mut buf = vec![0u8; chunk_size.max(BLOCK_SIZE)];
    let mut written = 0u64;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let plain = cipher.update(&buf[..n])?;
        writer.write_all(&plain).await?;
        written += plain.len() as u64;
    }

    let tail = cipher.finalize(&[])?;
    writer.write_all(&tail).await?;
    writer.flush().await?;
    written += tail.len() as u64;

    tracing::debug!(bytes = written, "Decrypted stream");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> CipherKey {
        CipherKey::from_bytes([0x42; 32])
    }

    const IV: [u8; IV_LEN] = [0x24; IV_LEN];

    fn stream_encrypt(data: &[u8], chunk: usize) -> Vec<u8> {
        let mut cipher = StreamCipher::encryptor(&key(), &IV);
        let mut out = Vec::new();
        let mut pieces = data.chunks(chunk.max(1)).peekable();
        let mut last: &[u8] = &[];
        while let Some(piece) = pieces.next() {
            if pieces.peek().is_none() {
                last = piece;
            } else {
                out.extend(cipher.update(piece).unwrap());
            }
        }
        out.extend(cipher.finalize(last).unwrap());
        out
    }

    fn stream_decrypt(data: &[u8], chunk: usize) -> CipherResult<Vec<u8>> {
        let mut cipher = StreamCipher::decryptor(&key(), &IV);
        let mut out = Vec::new();
        for piece in data.chunks(chunk.max(1)) {
            out.extend(cipher.update(piece)?);
        }
        out.extend(cipher.finalize(&[])?);
        Ok(out)
    }

    #[test]
    fn test_hello_world_in_four_byte_chunks() {
        let plaintext = b"hello world";
        let ciphertext = stream_encrypt(plaintext, 4);
        assert_eq!(ciphertext.len(), 16);
        assert_eq!(ciphertext, encrypt_bytes(&key(), &IV, plaintext));
        assert_eq!(decrypt_bytes(&key(), &IV, &ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn test_padding_for_every_length_and_chunking() {
        let data: Vec<u8> = (0..80u8).collect();
        for len in 0..data.len() {
            let plaintext = &data[..len];
            let reference = encrypt_bytes(&key(), &IV, plaintext);
            assert_eq!(reference.len() as u64, padded_len(len as u64));
            let pad = reference.len() - len;
            assert!((1..=16).contains(&pad), "len {len} padded by {pad}");

            for chunk in [1, 3, 15, 16, 17, 33, 64] {
                assert_eq!(
                    stream_encrypt(plaintext, chunk),
                    reference,
                    "len {len} chunk {chunk}"
                );
                assert_eq!(
                    stream_decrypt(&reference, chunk).unwrap(),
                    plaintext,
                    "len {len} chunk {chunk}"
                );
            }
        }
    }

    #[test]
    fn test_aligned_input_gets_full_pad_block() {
        let plaintext = [7u8; 32];
        let ciphertext = stream_encrypt(&plaintext, 16);
        assert_eq!(ciphertext.len(), 48);
    }

    #[test]
    fn test_empty_plaintext() {
        let cipher = StreamCipher::encryptor(&key(), &IV);
        let ciphertext = cipher.finalize(&[]).unwrap();
        assert_eq!(ciphertext.len(), 16);
        assert_eq!(stream_decrypt(&ciphertext, 16).unwrap(), b"");
    }

    #[test]
    fn test_truncated_ciphertext_rejected() {
        let ciphertext = encrypt_bytes(&key(), &IV, b"some longer plaintext here");
        assert!(stream_decrypt(&ciphertext[..ciphertext.len() - 1], 7).is_err());
        assert!(stream_decrypt(&[], 7).is_err());
    }

    #[test]
    fn test_wrong_key_does_not_recover_plaintext() {
        let plaintext = b"the quick brown fox jumps over the lazy dog";
        let ciphertext = encrypt_bytes(&key(), &IV, plaintext);
        let wrong = CipherKey::from_bytes([0x43; 32]);
        match decrypt_bytes(&wrong, &IV, &ciphertext) {
            Err(CipherError::Decryption(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
            Ok(recovered) => assert_ne!(recovered, plaintext),
        }
    }

    #[test]
    fn test_decryptor_withholds_last_block() {
        let ciphertext = encrypt_bytes(&key(), &IV, &[1u8; 16]);
        let mut cipher = StreamCipher::decryptor(&key(), &IV);
        let first = cipher.update(&ciphertext[..16]).unwrap();
        assert!(first.is_empty());
        let second = cipher.update(&ciphertext[16..]).unwrap();
        assert_eq!(second, vec![1u8; 16]);
        assert!(cipher.finalize(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_password_roundtrip_and_wrong_password() {
        let plaintext = b"password protected payload";
        let (ciphertext, metadata) = encrypt_with_password("s3cret", plaintext, 1_000).unwrap();
        assert_eq!(
            decrypt_with_password("s3cret", &ciphertext, &metadata).unwrap(),
            plaintext
        );
        match decrypt_with_password("wrong", &ciphertext, &metadata) {
            Err(_) => {}
            Ok(recovered) => assert_ne!(recovered, plaintext),
        }
    }

    #[tokio::test]
    async fn test_decrypt_stream() {
        let plaintext: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let ciphertext = encrypt_bytes(&key(), &IV, &plaintext);
        let mut out = Vec::new();
        let written = decrypt_stream(&ciphertext[..], &mut out, &key(), &IV, 100)
            .await
            .unwrap();
        assert_eq!(written, plaintext.len() as u64);
        assert_eq!(out, plaintext);
    }
}
