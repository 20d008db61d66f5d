//! Cryptographic primitives: key material generation, RSA-OAEP key
//! wrapping, and single-pass AES-256-GCM stream encryption.
//!
//! Payloads may be many gigabytes and arrive lazily from the payload
//! streamer, so the GCM encryptor works incrementally: it drives the
//! CTR keystream and the GHASH tag state chunk by chunk and appends the
//! 16-byte tag after the last ciphertext byte. The output is byte-for-byte
//! identical to a one-shot `Aes256Gcm::encrypt` of the same input, which
//! the unit tests pin down.

use std::io::{Read, Write};

use aes::cipher::{BlockEncrypt, KeyInit, KeyIvInit, StreamCipher};
use aes::{Aes256, Block};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ctr::Ctr32BE;
use ghash::{universal_hash::UniversalHash, GHash};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::constants::{AES_KEY_LEN, GCM_IV_LEN, STREAM_CHUNK_SIZE};
use crate::errors::{Error, Result};

const PEM_HEADER: &str = "-----BEGIN PUBLIC KEY-----";
const PEM_FOOTER: &str = "-----END PUBLIC KEY-----";

const GHASH_BLOCK: usize = 16;

/// Generate a fresh 256-bit AES key. The key zeroizes itself on drop.
pub fn generate_aes_key() -> Zeroizing<[u8; AES_KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; AES_KEY_LEN]);
    OsRng.fill_bytes(&mut key[..]);
    key
}

/// Generate a fresh 96-bit AES-GCM IV.
///
/// An IV must never be reused with the same key; every encryption site
/// calls this for its own IV.
pub fn generate_iv() -> [u8; GCM_IV_LEN] {
    let mut iv = [0u8; GCM_IV_LEN];
    OsRng.fill_bytes(&mut iv);
    iv
}

/// `n` bytes from the OS CSPRNG.
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; n];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Parse an SPKI public key out of PEM text.
///
/// Token claims carry the PEM with arbitrary embedded whitespace, so the
/// armor lines are stripped and every whitespace character removed before
/// base64-decoding the DER.
fn parse_public_key(pem: &str) -> Result<RsaPublicKey> {
    let b64: String = pem
        .replace(PEM_HEADER, "")
        .replace(PEM_FOOTER, "")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let der = STANDARD
        .decode(b64)
        .map_err(|e| Error::BadKey(format!("public key is not valid base64: {e}")))?;
    RsaPublicKey::from_public_key_der(&der)
        .map_err(|e| Error::BadKey(format!("public key DER is not a valid SPKI: {e}")))
}

/// Encrypt `data` under the RSA public key in `pem` with OAEP padding,
/// SHA-256 for both the hash and the MGF1, and an empty label.
pub fn rsa_oaep_wrap(pem: &str, data: &[u8]) -> Result<Vec<u8>> {
    let key = parse_public_key(pem)?;
    key.encrypt(&mut OsRng, Oaep::new::<Sha256>(), data)
        .map_err(|e| Error::CryptoFail(format!("RSA-OAEP encryption failed: {e}")))
}

/// Stream-encrypt `input` into `output` with AES-256-GCM.
///
/// Reads the input in 4KB chunks, writes ciphertext incrementally, and
/// appends the 128-bit authentication tag after the final chunk. Returns
/// the plaintext length.
pub fn aes_gcm_encrypt_stream<R, W>(
    key: &[u8; AES_KEY_LEN],
    iv: &[u8; GCM_IV_LEN],
    input: &mut R,
    output: &mut W,
) -> Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let cipher = Aes256::new(key.into());

    // GHASH subkey H = E_K(0^128)
    let mut hash_key = Block::default();
    cipher.encrypt_block(&mut hash_key);
    let mut ghash = GHash::new(&hash_key);

    // J0 = IV || 0^31 || 1 for a 96-bit IV; the tag mask is E_K(J0) and
    // the keystream counter starts at inc32(J0).
    let mut j0 = Block::default();
    j0[..GCM_IV_LEN].copy_from_slice(iv);
    j0[15] = 1;
    let mut tag_mask = j0;
    cipher.encrypt_block(&mut tag_mask);

    let mut counter = j0;
    counter[15] = 2;
    let mut keystream = Ctr32BE::<Aes256>::new(key.into(), &counter);

    // GHASH consumes whole blocks; a residue buffer keeps the ciphertext
    // feed 16-byte aligned across arbitrary read sizes.
    let mut residue = Block::default();
    let mut residue_len = 0usize;
    let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
    let mut total: u64 = 0;

    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        let chunk = &mut buf[..n];
        keystream.apply_keystream(chunk);
        output.write_all(chunk)?;
        total += n as u64;

        let mut data: &[u8] = chunk;
        if residue_len > 0 {
            let take = (GHASH_BLOCK - residue_len).min(data.len());
            residue[residue_len..residue_len + take].copy_from_slice(&data[..take]);
            residue_len += take;
            data = &data[take..];
            if residue_len == GHASH_BLOCK {
                ghash.update(core::slice::from_ref(&residue));
                residue_len = 0;
            }
        }
        let mut blocks = data.chunks_exact(GHASH_BLOCK);
        for block in &mut blocks {
            ghash.update(core::slice::from_ref(Block::from_slice(block)));
        }
        let tail = blocks.remainder();
        if !tail.is_empty() {
            residue[..tail.len()].copy_from_slice(tail);
            residue_len = tail.len();
        }
    }

    if residue_len > 0 {
        for byte in residue[residue_len..].iter_mut() {
            *byte = 0;
        }
        ghash.update(core::slice::from_ref(&residue));
    }

    // Length block: 64-bit AAD bit count (zero, no AAD) then the
    // ciphertext bit count.
    let mut len_block = Block::default();
    len_block[8..].copy_from_slice(&(total * 8).to_be_bytes());
    ghash.update(core::slice::from_ref(&len_block));

    let mut tag = ghash.finalize();
    for (t, m) in tag.iter_mut().zip(tag_mask.iter()) {
        *t ^= m;
    }
    output.write_all(&tag)?;

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes_gcm::aead::Aead;
    use aes_gcm::{Aes256Gcm, Nonce};
    use rsa::pkcs8::{EncodePublicKey, LineEnding};
    use rsa::RsaPrivateKey;
    use std::io::Cursor;

    fn one_shot(key: &[u8; 32], iv: &[u8; 12], plaintext: &[u8]) -> Vec<u8> {
        Aes256Gcm::new_from_slice(key)
            .unwrap()
            .encrypt(Nonce::from_slice(iv), plaintext)
            .unwrap()
    }

    #[test]
    fn key_and_iv_lengths() {
        assert_eq!(generate_aes_key().len(), 32);
        assert_eq!(generate_iv().len(), 12);
        assert_eq!(random_bytes(128).len(), 128);
    }

    #[test]
    fn fresh_randomness_every_call() {
        assert_ne!(&generate_aes_key()[..], &generate_aes_key()[..]);
        assert_ne!(generate_iv(), generate_iv());
        assert_ne!(random_bytes(16), random_bytes(16));
    }

    #[test]
    fn streaming_matches_one_shot_gcm() {
        let key = [0x42u8; 32];
        let iv = [0x07u8; 12];
        // empty, sub-block, block-aligned, one-past, chunk-aligned,
        // multi-chunk inputs
        for size in [0usize, 1, 15, 16, 17, 255, 4095, 4096, 4097, 10000] {
            let plaintext: Vec<u8> = (0..size).map(|i| (i * 31 % 251) as u8).collect();
            let mut streamed = Vec::new();
            let written =
                aes_gcm_encrypt_stream(&key, &iv, &mut Cursor::new(&plaintext), &mut streamed)
                    .unwrap();
            assert_eq!(written, size as u64);
            assert_eq!(streamed, one_shot(&key, &iv, &plaintext), "size {size}");
        }
    }

    #[test]
    fn streamed_ciphertext_decrypts() {
        let key = [9u8; 32];
        let iv = generate_iv();
        let plaintext = b"attack at dawn".to_vec();
        let mut ciphertext = Vec::new();
        aes_gcm_encrypt_stream(&key, &iv, &mut Cursor::new(&plaintext), &mut ciphertext).unwrap();

        let recovered = Aes256Gcm::new_from_slice(&key)
            .unwrap()
            .decrypt(Nonce::from_slice(&iv), ciphertext.as_slice())
            .unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn tag_is_appended() {
        let key = [1u8; 32];
        let iv = [2u8; 12];
        let mut out = Vec::new();
        aes_gcm_encrypt_stream(&key, &iv, &mut Cursor::new(b"hello"), &mut out).unwrap();
        assert_eq!(out.len(), 5 + 16);
    }

    #[test]
    fn rsa_wrap_round_trip() {
        let private = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let pem = private
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();

        let secret = b"wrapped key material";
        let wrapped = rsa_oaep_wrap(&pem, secret).unwrap();
        assert_ne!(&wrapped[..], &secret[..]);

        let unwrapped = private.decrypt(Oaep::new::<Sha256>(), &wrapped).unwrap();
        assert_eq!(unwrapped, secret);
    }

    #[test]
    fn rsa_wrap_tolerates_embedded_whitespace() {
        let private = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let pem = private
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        // token claims often carry the PEM with mangled line breaks
        let mangled = pem.replace('\n', " \n  ");

        let wrapped = rsa_oaep_wrap(&mangled, b"data").unwrap();
        let unwrapped = private.decrypt(Oaep::new::<Sha256>(), &wrapped).unwrap();
        assert_eq!(unwrapped, b"data");
    }

    #[test]
    fn garbage_pem_is_bad_key() {
        let err = rsa_oaep_wrap("not a key at all!!!", b"data").unwrap_err();
        assert!(matches!(err, Error::BadKey(_)));
    }

    #[test]
    fn oversized_plaintext_is_crypto_fail() {
        let private = RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
        let pem = private
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        // 2048-bit OAEP-SHA256 caps the message at 190 bytes
        let err = rsa_oaep_wrap(&pem, &[0u8; 300]).unwrap_err();
        assert!(matches!(err, Error::CryptoFail(_)));
    }
}
