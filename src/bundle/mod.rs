//! Assembles the sealed bundle: a ZIP container holding the metadata
//! entries and the (optionally encrypted) payload.
//!
//! Entry order is part of the format: metadata first, `payload.enc`
//! always last, so a receiver can read the key material before it reaches
//! the payload stream.

pub mod version;

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{SecondsFormat, Utc};
use log::debug;
use zip::write::{FileOptions, ZipWriter};

use crate::constants::{OUTPUT_SUBDIR, PLAINTEXT_PROJECT_ID, STREAM_CHUNK_SIZE, TEST_PROBE_LEN};
use crate::crypto;
use crate::errors::{Error, Result};
use version::BundleFormatVersion;

const ENTRY_UUID: &str = "uuid.txt";
const ENTRY_DATE: &str = "bundle_date.txt";
const ENTRY_CONTAINER: &str = "payload_container_type.txt";
const ENTRY_COMMENT: &str = "comment.txt";
const ENTRY_VERSION: &str = "bundle_format_version.txt";
const ENTRY_KEY: &str = "key.txt";
const ENTRY_PUBKEY: &str = "pubkey.pem";
const ENTRY_TEST: &str = "test.txt";
const ENTRY_IV: &str = "iv.txt";
const ENTRY_MIME: &str = "mime.txt";
const ENTRY_PAYLOAD: &str = "payload.enc";

/// Build the sealed bundle and return the artifact path.
///
/// When `pub_key_pem` is present the payload is stream-encrypted under a
/// fresh AES key that is RSA-wrapped into `key.txt`; otherwise the payload
/// bytes are stored as-is and `uuid.txt` falls back to `plaintext_upload`.
/// A failure at any step deletes the partial artifact before surfacing.
#[allow(clippy::too_many_arguments)]
pub fn build<R: Read + ?Sized>(
    uuid: Option<&str>,
    pub_key_pem: Option<&str>,
    payload: &mut R,
    is_archive: bool,
    mime: &str,
    comment: Option<&str>,
    output_dir: Option<&Path>,
    version: BundleFormatVersion,
) -> Result<PathBuf> {
    let dir = match output_dir {
        Some(dir) => dir.join(OUTPUT_SUBDIR),
        None => std::env::temp_dir().join(OUTPUT_SUBDIR),
    };
    fs::create_dir_all(&dir)?;

    let project = uuid.unwrap_or(PLAINTEXT_PROJECT_ID);
    let file_name = format!("{}-{}.zip", project, Utc::now().timestamp_millis());
    let artifact = dir.join(file_name);
    debug!("writing bundle to {}", artifact.display());

    if let Err(e) = write_bundle(
        &artifact,
        project,
        pub_key_pem,
        payload,
        is_archive,
        mime,
        comment,
        version,
    ) {
        let _ = fs::remove_file(&artifact);
        return Err(e);
    }
    Ok(artifact)
}

#[allow(clippy::too_many_arguments)]
fn write_bundle<R: Read + ?Sized>(
    artifact: &Path,
    project: &str,
    pub_key_pem: Option<&str>,
    payload: &mut R,
    is_archive: bool,
    mime: &str,
    comment: Option<&str>,
    version: BundleFormatVersion,
) -> Result<()> {
    let file = File::create(artifact)?;
    let mut zip = ZipWriter::new(file);

    write_entry(&mut zip, ENTRY_UUID, project.as_bytes())?;
    write_entry(
        &mut zip,
        ENTRY_DATE,
        Utc::now()
            .to_rfc3339_opts(SecondsFormat::Millis, true)
            .as_bytes(),
    )?;
    write_entry(
        &mut zip,
        ENTRY_CONTAINER,
        version.container_label(is_archive).as_bytes(),
    )?;
    if let Some(comment) = comment {
        write_entry(&mut zip, ENTRY_COMMENT, comment.as_bytes())?;
    }
    write_entry(
        &mut zip,
        ENTRY_VERSION,
        version.version_number().to_string().as_bytes(),
    )?;

    let mut key_material = None;
    if let Some(pem) = pub_key_pem {
        let aes_key = crypto::generate_aes_key();
        let wrapped = crypto::rsa_oaep_wrap(pem, &aes_key[..])?;
        write_entry(&mut zip, ENTRY_KEY, STANDARD.encode(&wrapped).as_bytes())?;
        write_entry(&mut zip, ENTRY_PUBKEY, pem.as_bytes())?;

        // known-answer probe: IV, plaintext, and its ciphertext under the
        // bundle key, so the receiver can verify unwrapping before it
        // touches the payload
        let test_iv = crypto::generate_iv();
        let test_plain = crypto::random_bytes(TEST_PROBE_LEN);
        let test_cipher = Aes256Gcm::new_from_slice(&aes_key[..])
            .map_err(|e| Error::CryptoFail(format!("probe cipher init failed: {e}")))?
            .encrypt(Nonce::from_slice(&test_iv), &test_plain[..])
            .map_err(|e| Error::CryptoFail(format!("probe encryption failed: {e}")))?;
        let test_entry = [
            STANDARD.encode(test_iv),
            STANDARD.encode(&test_plain),
            STANDARD.encode(&test_cipher),
        ]
        .join("\n");
        write_entry(&mut zip, ENTRY_TEST, test_entry.as_bytes())?;

        // the payload IV is independent of the probe IV
        let payload_iv = crypto::generate_iv();
        write_entry(&mut zip, ENTRY_IV, STANDARD.encode(payload_iv).as_bytes())?;
        key_material = Some((aes_key, payload_iv));
    }

    write_entry(&mut zip, ENTRY_MIME, mime.as_bytes())?;

    zip.start_file(ENTRY_PAYLOAD, FileOptions::default().large_file(true))?;
    match &key_material {
        Some((aes_key, payload_iv)) => {
            let sealed = crypto::aes_gcm_encrypt_stream(aes_key, payload_iv, payload, &mut zip)?;
            debug!("sealed {} payload bytes", sealed);
        }
        None => {
            let mut buf = [0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = payload.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                zip.write_all(&buf[..n])?;
            }
        }
    }

    let file = zip.finish()?;
    file.sync_all()?;
    Ok(())
}

fn write_entry(zip: &mut ZipWriter<File>, name: &str, data: &[u8]) -> Result<()> {
    zip.start_file(name, FileOptions::default())?;
    zip.write_all(data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn filename_carries_project_and_millis() {
        let temp = TempDir::new().unwrap();
        let artifact = build(
            Some("proj"),
            None,
            &mut Cursor::new(b"data".to_vec()),
            false,
            "application/x",
            None,
            Some(temp.path()),
            BundleFormatVersion::V1,
        )
        .unwrap();

        let name = artifact.file_name().unwrap().to_str().unwrap();
        let stem = name.strip_suffix(".zip").unwrap();
        let millis = stem.strip_prefix("proj-").unwrap();
        assert!(!millis.is_empty());
        assert!(millis.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn output_lands_in_tool_subdirectory() {
        let temp = TempDir::new().unwrap();
        let artifact = build(
            None,
            None,
            &mut Cursor::new(b"x".to_vec()),
            false,
            "application/x",
            None,
            Some(temp.path()),
            BundleFormatVersion::V2,
        )
        .unwrap();
        assert_eq!(artifact.parent().unwrap(), temp.path().join(OUTPUT_SUBDIR));
    }

    #[test]
    fn bad_pem_fails_and_removes_partial_artifact() {
        let temp = TempDir::new().unwrap();
        let err = build(
            Some("proj"),
            Some("-----BEGIN PUBLIC KEY-----\ngarbage\n-----END PUBLIC KEY-----"),
            &mut Cursor::new(b"data".to_vec()),
            false,
            "application/x",
            None,
            Some(temp.path()),
            BundleFormatVersion::V1,
        )
        .unwrap_err();
        assert!(matches!(err, Error::BadKey(_)));

        let leftovers: Vec<_> = fs::read_dir(temp.path().join(OUTPUT_SUBDIR))
            .unwrap()
            .collect();
        assert!(leftovers.is_empty());
    }
}
