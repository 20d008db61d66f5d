//! Global constants for the sealbundle application.
//!
//! This module centralizes all hardcoded values to improve maintainability
//! and make configuration changes easier.

// Memory and buffer size constants
/// Default buffer size for file operations (64KB)
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Chunk size for streaming reads through the encryption pipeline (4KB)
pub const STREAM_CHUNK_SIZE: usize = 4096;

/// Capacity of the in-memory pipe between the payload producer and the
/// bundle builder (64KB)
pub const PIPE_BUFFER_SIZE: usize = 64 * 1024;

/// Chunk size for part upload bodies (8KB)
pub const PART_CHUNK_SIZE: usize = 8192;

// Cryptography constants
/// AES-256 key length in bytes
pub const AES_KEY_LEN: usize = 32;

/// AES-GCM IV length in bytes
pub const GCM_IV_LEN: usize = 12;

/// AES-GCM authentication tag length in bytes
pub const GCM_TAG_LEN: usize = 16;

/// Length of the random plaintext in the bundle's known-answer probe
pub const TEST_PROBE_LEN: usize = 128;

// Upload retry and timeout constants
/// Total attempts per request class (first try plus retries)
pub const MAX_REQUEST_ATTEMPTS: usize = 3;

/// Initial retry backoff in milliseconds; doubles after every failure
pub const INITIAL_BACKOFF_MS: u64 = 1000;

/// Maximum number of parts uploading in parallel
pub const PARALLEL_UPLOADS: usize = 4;

/// HTTP connect timeout in seconds
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// HTTP read timeout in seconds (5 minutes)
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Overall HTTP request timeout in seconds (10 minutes)
pub const REQUEST_TIMEOUT_SECS: u64 = 600;

// Progress reporting constants
/// Smallest number of bytes a part worker batches locally before
/// publishing to the shared progress counter (8KB)
pub const MIN_PROGRESS_BATCH: u64 = 8192;

// Bearer token claim keys
pub const CLAIM_PUBLIC_KEY: &str = "x-public-key";
pub const CLAIM_SERVER: &str = "x-upload-server";
pub const CLAIM_UUID: &str = "x-uuid-project";
pub const CLAIM_CHALLENGE: &str = "x-challenge";
pub const CLAIM_EXP: &str = "exp";

// Payload MIME tokens recorded inside the bundle
pub const MIME_ADG: &str = "application/vnd.cc.bigtent";
pub const MIME_DEPLOY_EVENTS: &str = "application/vnd.info.deployevent";

// Output constants
/// Subdirectory created under the chosen output directory
pub const OUTPUT_SUBDIR: &str = "sealbundle-out";

/// Project id recorded in clear-text bundles built without a key
pub const PLAINTEXT_PROJECT_ID: &str = "plaintext_upload";
