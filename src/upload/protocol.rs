//! Wire types for the three-phase multipart upload protocol.

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest<'a> {
    pub sha256: &'a str,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_challenge: Option<String>,
}

/// The raw init response; every field the protocol requires is optional
/// here so that [`InitResponse::validate`] can name everything missing at
/// once instead of failing on the first absent field.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitResponse {
    pub upload_id: Option<String>,
    pub blob_key: Option<String>,
    pub bundle_id: Option<String>,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default)]
    pub parts: Vec<PartInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartInfo {
    pub part_number: u32,
    pub presigned_url: String,
    pub offset: u64,
    pub size: u64,
}

/// A validated init response.
#[derive(Debug)]
pub struct MultipartUpload {
    pub upload_id: String,
    pub blob_key: String,
    pub bundle_id: String,
    pub expires_in: u64,
    pub parts: Vec<PartInfo>,
}

impl InitResponse {
    pub fn validate(self) -> Result<MultipartUpload> {
        let mut missing = Vec::new();
        if self.upload_id.is_none() {
            missing.push("uploadId");
        }
        if self.blob_key.is_none() {
            missing.push("blobKey");
        }
        if self.bundle_id.is_none() {
            missing.push("bundleId");
        }
        if self.parts.is_empty() {
            missing.push("parts");
        }
        let (Some(upload_id), Some(blob_key), Some(bundle_id)) =
            (self.upload_id, self.blob_key, self.bundle_id)
        else {
            return Err(missing_fields(&missing));
        };
        if !missing.is_empty() {
            return Err(missing_fields(&missing));
        }
        Ok(MultipartUpload {
            upload_id,
            blob_key,
            bundle_id,
            expires_in: self.expires_in,
            parts: self.parts,
        })
    }
}

fn missing_fields(missing: &[&str]) -> Error {
    Error::Protocol(format!(
        "init response missing required fields: {}",
        missing.join(", ")
    ))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest<'a> {
    pub upload_id: &'a str,
    pub blob_key: &'a str,
    pub sha256: &'a str,
    pub parts: Vec<CompletedPart>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResponse {
    pub status: Option<String>,
    pub bundle_id: Option<String>,
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_response() -> InitResponse {
        InitResponse {
            upload_id: Some("u".into()),
            blob_key: Some("b".into()),
            bundle_id: Some("B".into()),
            expires_in: 3600,
            parts: vec![PartInfo {
                part_number: 1,
                presigned_url: "https://storage/upload/1".into(),
                offset: 0,
                size: 12,
            }],
        }
    }

    #[test]
    fn validate_accepts_complete_response() {
        let upload = full_response().validate().unwrap();
        assert_eq!(upload.upload_id, "u");
        assert_eq!(upload.blob_key, "b");
        assert_eq!(upload.bundle_id, "B");
        assert_eq!(upload.parts.len(), 1);
    }

    #[test]
    fn validate_names_every_missing_field() {
        let response = InitResponse {
            upload_id: None,
            blob_key: None,
            bundle_id: None,
            expires_in: 3600,
            parts: Vec::new(),
        };
        let err = response.validate().unwrap_err();
        let msg = err.to_string();
        for field in ["uploadId", "blobKey", "bundleId", "parts"] {
            assert!(msg.contains(field), "expected {field} in {msg}");
        }
    }

    #[test]
    fn validate_rejects_empty_parts() {
        let mut response = full_response();
        response.parts.clear();
        let err = response.validate().unwrap_err();
        assert!(err.to_string().contains("parts"));
    }

    #[test]
    fn init_request_serializes_camel_case_and_skips_absent_options() {
        let request = InitRequest {
            sha256: "abc",
            size_bytes: 12,
            filename: None,
            encrypted_challenge: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"sizeBytes\":12"));
        assert!(!json.contains("filename"));
        assert!(!json.contains("encryptedChallenge"));
    }

    #[test]
    fn init_response_ignores_unknown_fields() {
        let parsed: InitResponse = serde_json::from_str(
            r#"{"uploadId":"u","blobKey":"b","bundleId":"B","expiresIn":60,
                "parts":[{"partNumber":1,"presignedUrl":"s","offset":0,"size":5}],
                "extra":"ignored"}"#,
        )
        .unwrap();
        assert_eq!(parsed.expires_in, 60);
        assert_eq!(parsed.parts[0].size, 5);
    }

    #[test]
    fn complete_request_serializes_parts_in_given_order() {
        let request = CompleteRequest {
            upload_id: "u",
            blob_key: "b",
            sha256: "s",
            parts: vec![
                CompletedPart {
                    part_number: 1,
                    etag: "a".into(),
                },
                CompletedPart {
                    part_number: 2,
                    etag: "b".into(),
                },
            ],
        };
        let json = serde_json::to_string(&request).unwrap();
        let first = json.find("\"partNumber\":1").unwrap();
        let second = json.find("\"partNumber\":2").unwrap();
        assert!(first < second);
    }
}
