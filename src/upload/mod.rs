//! The three-phase multipart upload engine: init, parallel part PUTs with
//! retry, complete.
//!
//! Once it has a base URL, a bearer token, the artifact, and optionally a
//! public key and challenge, the engine is independent of how the bundle
//! was built. No part starts before init succeeds; the complete manifest
//! is always sorted by part number regardless of which order the parts
//! finished in.

pub mod client;
pub mod progress;
pub mod protocol;
pub mod retry;

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use futures::stream::{self, Stream};
use log::{debug, error, info};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG};
use reqwest::Body;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::constants::{PARALLEL_UPLOADS, PART_CHUNK_SIZE};
use crate::crypto;
use crate::errors::{Error, Result};
use crate::utils::hash;
use progress::{format_bytes, UploadProgress};
use protocol::{
    CompleteRequest, CompleteResponse, CompletedPart, InitRequest, InitResponse, MultipartUpload,
    PartInfo,
};
use retry::execute_with_retry;

/// Strip trailing slashes so path joining yields exactly one separator.
fn normalize_base_url(url: &str) -> &str {
    url.trim_end_matches('/')
}

/// Drive the full upload of `artifact` against the ingestion service.
pub async fn upload_direct(
    base_url: &str,
    token: &str,
    public_key_pem: Option<&str>,
    artifact: &Path,
    filename: Option<&str>,
    challenge: Option<&str>,
) -> Result<CompleteResponse> {
    let sha256 = hash::sha256_hex(artifact)?;
    let size_bytes = std::fs::metadata(artifact)?.len();

    let host = reqwest::Url::parse(base_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| base_url.to_string());
    info!(
        "Starting direct upload to {}: {} bytes, SHA256 {}",
        host, size_bytes, sha256
    );

    let upload = init_upload(
        base_url,
        token,
        public_key_pem,
        &sha256,
        size_bytes,
        filename,
        challenge,
    )
    .await?;
    info!(
        "Initialized multipart upload: {} parts, bundleId={}",
        upload.parts.len(),
        upload.bundle_id
    );

    let completed = upload_parts(artifact, &upload.parts).await?;

    let response = complete_upload(base_url, token, &upload, &sha256, completed).await?;
    info!(
        "Upload complete: status={}, bundleId={}, sha256={}",
        response.status.as_deref().unwrap_or("unknown"),
        response.bundle_id.as_deref().unwrap_or("unknown"),
        sha256
    );
    Ok(response)
}

#[allow(clippy::too_many_arguments)]
async fn init_upload(
    base_url: &str,
    token: &str,
    public_key_pem: Option<&str>,
    sha256: &str,
    size_bytes: u64,
    filename: Option<&str>,
    challenge: Option<&str>,
) -> Result<MultipartUpload> {
    let url = format!("{}/init", normalize_base_url(base_url));

    let encrypted_challenge = match challenge.filter(|c| !c.is_empty()) {
        Some(challenge) => {
            let pem = public_key_pem.filter(|p| !p.is_empty()).ok_or_else(|| {
                Error::BadInput(
                    "a public key is required to encrypt the upload challenge".to_string(),
                )
            })?;
            let wrapped = crypto::rsa_oaep_wrap(pem, challenge.as_bytes())?;
            Some(STANDARD.encode(wrapped))
        }
        None => None,
    };

    let request = InitRequest {
        sha256,
        size_bytes,
        filename: filename.filter(|f| !f.is_empty()),
        encrypted_challenge,
    };

    let http = client::http_client();
    let response = execute_with_retry("init upload", None, || {
        http.post(&url).bearer_auth(token).json(&request).send()
    })
    .await?;

    let body = response.text().await?;
    let parsed: InitResponse = serde_json::from_str(&body)
        .map_err(|e| Error::Protocol(format!("cannot parse init response: {e}")))?;
    debug!("init response: upload expires in {}s", parsed.expires_in);
    parsed.validate()
}

async fn upload_parts(artifact: &Path, parts: &[PartInfo]) -> Result<Vec<CompletedPart>> {
    let total_size: u64 = parts.iter().map(|p| p.size).sum();
    info!(
        "Uploading {} in {} parts...",
        format_bytes(total_size),
        parts.len()
    );

    let progress = Arc::new(UploadProgress::new(total_size));
    let etags: Arc<Mutex<HashMap<u32, String>>> = Arc::new(Mutex::new(HashMap::new()));
    let semaphore = Arc::new(Semaphore::new(PARALLEL_UPLOADS.min(parts.len()).max(1)));
    let started = Instant::now();

    let mut workers = JoinSet::new();
    for part in parts.iter().cloned() {
        let artifact = artifact.to_path_buf();
        let progress = Arc::clone(&progress);
        let etags = Arc::clone(&etags);
        let semaphore = Arc::clone(&semaphore);
        workers.spawn(async move {
            let _permit = semaphore.acquire_owned().await.map_err(|_| Error::Cancelled)?;
            let etag = upload_part(&artifact, &part, progress).await?;
            let mut map = etags.lock().map_err(|_| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "etag map lock poisoned",
                ))
            })?;
            map.insert(part.part_number, etag);
            Ok::<(), Error>(())
        });
    }

    // first failure wins; the rest of the fleet is aborted and any further
    // failures are only logged
    let mut first_failure: Option<Error> = None;
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                if first_failure.is_none() {
                    workers.abort_all();
                    first_failure = Some(e);
                } else {
                    error!("additional part upload failure: {}", e);
                }
            }
            Err(join_error) if join_error.is_cancelled() => {}
            Err(join_error) => {
                let e = Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("part upload worker failed: {join_error}"),
                ));
                if first_failure.is_none() {
                    workers.abort_all();
                    first_failure = Some(e);
                } else {
                    error!("additional part upload failure: {}", e);
                }
            }
        }
    }
    if let Some(e) = first_failure {
        return Err(e);
    }

    println!();
    let elapsed = started.elapsed();
    let average = if elapsed.as_millis() > 0 {
        format!(
            "{}/s",
            format_bytes((total_size as u128 * 1000 / elapsed.as_millis()) as u64)
        )
    } else {
        "N/A".to_string()
    };
    info!(
        "Uploaded {} in {}s (avg: {}), {} bytes accounted",
        format_bytes(total_size),
        elapsed.as_secs(),
        average,
        progress.bytes_uploaded()
    );

    let etags = etags.lock().map_err(|_| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "etag map lock poisoned",
        ))
    })?;
    let mut ordered: Vec<&PartInfo> = parts.iter().collect();
    ordered.sort_by_key(|p| p.part_number);
    let mut manifest = Vec::with_capacity(ordered.len());
    for part in ordered {
        let etag = etags.get(&part.part_number).cloned().ok_or_else(|| {
            Error::Protocol(format!("no etag recorded for part {}", part.part_number))
        })?;
        manifest.push(CompletedPart {
            part_number: part.part_number,
            etag,
        });
    }
    Ok(manifest)
}

async fn upload_part(
    artifact: &Path,
    part: &PartInfo,
    progress: Arc<UploadProgress>,
) -> Result<String> {
    let attempt_bytes = Arc::new(AtomicU64::new(0));

    let mut reset = {
        let progress = Arc::clone(&progress);
        let attempt_bytes = Arc::clone(&attempt_bytes);
        move || {
            let contributed = attempt_bytes.swap(0, Ordering::SeqCst);
            progress.rollback(contributed);
        }
    };

    let http = client::http_client();
    let operation = format!("part {}", part.part_number);
    let response = execute_with_retry(&operation, Some(&mut reset), || {
        let body = part_body(
            artifact.to_path_buf(),
            part.offset,
            part.size,
            Arc::clone(&progress),
            Arc::clone(&attempt_bytes),
        );
        http.put(&part.presigned_url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, part.size)
            .body(Body::wrap_stream(body))
            .send()
    })
    .await?;

    response
        .headers()
        .get(ETAG)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim_matches('"').to_string())
        .ok_or_else(|| {
            Error::Protocol(format!(
                "no ETag in response for part {}",
                part.part_number
            ))
        })
}

struct PartStreamState {
    path: PathBuf,
    file: Option<tokio::fs::File>,
    offset: u64,
    remaining: u64,
    pending: u64,
    threshold: u64,
    progress: Arc<UploadProgress>,
    attempt_bytes: Arc<AtomicU64>,
    done: bool,
}

impl PartStreamState {
    fn flush_pending(&mut self) {
        if self.pending > 0 {
            self.attempt_bytes.fetch_add(self.pending, Ordering::SeqCst);
            self.progress.record(self.pending);
            self.pending = 0;
        }
    }

    async fn next_chunk(&mut self) -> std::io::Result<Bytes> {
        if self.file.is_none() {
            let mut file = tokio::fs::File::open(&self.path).await?;
            file.seek(SeekFrom::Start(self.offset)).await?;
            self.file = Some(file);
        }
        let Some(file) = self.file.as_mut() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "part source file unavailable",
            ));
        };

        let want = PART_CHUNK_SIZE.min(self.remaining as usize);
        let mut buf = vec![0u8; want];
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "artifact ended before the part range was fully sent",
            ));
        }
        buf.truncate(n);
        self.remaining -= n as u64;
        self.pending += n as u64;
        if self.pending >= self.threshold || self.remaining == 0 {
            self.flush_pending();
        }
        Ok(Bytes::from(buf))
    }
}

/// Body stream for one part attempt: the byte range `[offset,
/// offset+size)` of the artifact, read through a worker-private file
/// handle in file order.
///
/// Built fresh for every attempt; progress batches flow into the shared
/// counter and into the attempt ledger the retry hook rolls back.
fn part_body(
    path: PathBuf,
    offset: u64,
    size: u64,
    progress: Arc<UploadProgress>,
    attempt_bytes: Arc<AtomicU64>,
) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static {
    attempt_bytes.store(0, Ordering::SeqCst);
    let threshold = progress.batch_threshold();
    let state = PartStreamState {
        path,
        file: None,
        offset,
        remaining: size,
        pending: 0,
        threshold,
        progress,
        attempt_bytes,
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.done || state.remaining == 0 {
            return None;
        }
        match state.next_chunk().await {
            Ok(chunk) => Some((Ok(chunk), state)),
            Err(e) => {
                state.done = true;
                Some((Err(e), state))
            }
        }
    })
}

async fn complete_upload(
    base_url: &str,
    token: &str,
    upload: &MultipartUpload,
    sha256: &str,
    parts: Vec<CompletedPart>,
) -> Result<CompleteResponse> {
    let url = format!("{}/complete", normalize_base_url(base_url));
    let request = CompleteRequest {
        upload_id: &upload.upload_id,
        blob_key: &upload.blob_key,
        sha256,
        parts,
    };

    let http = client::http_client();
    let response = execute_with_retry("complete upload", None, || {
        http.post(&url).bearer_auth(token).json(&request).send()
    })
    .await?;

    let body = response.text().await?;
    serde_json::from_str(&body)
        .map_err(|e| Error::Protocol(format!("cannot parse complete response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_normalization() {
        assert_eq!(normalize_base_url("https://host/api/"), "https://host/api");
        assert_eq!(normalize_base_url("https://host/api"), "https://host/api");
        assert_eq!(
            normalize_base_url("https://host/api///"),
            "https://host/api"
        );
    }
}
