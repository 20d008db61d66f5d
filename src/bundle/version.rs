//! Bundle format versioning.
//!
//! A version is a named set of features; new versions attach new features
//! without touching existing call sites. The only feature today is gzip
//! compression of directory payloads.

use crate::errors::{Error, Result};

/// Feature switches a bundle format version can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    CompressTar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleFormatVersion {
    V1,
    V2,
}

impl BundleFormatVersion {
    pub fn from_int(version: u32) -> Result<Self> {
        match version {
            1 => Ok(BundleFormatVersion::V1),
            2 => Ok(BundleFormatVersion::V2),
            other => Err(Error::BadInput(format!(
                "unknown bundle format version: {other}"
            ))),
        }
    }

    pub fn version_number(self) -> u32 {
        match self {
            BundleFormatVersion::V1 => 1,
            BundleFormatVersion::V2 => 2,
        }
    }

    pub fn supports(self, feature: Feature) -> bool {
        match (self, feature) {
            (BundleFormatVersion::V2, Feature::CompressTar) => true,
            (BundleFormatVersion::V1, _) => false,
        }
    }

    pub fn compresses_payload(self) -> bool {
        self.supports(Feature::CompressTar)
    }

    /// The `payload_container_type.txt` label for a payload of this shape.
    pub fn container_label(self, is_archive: bool) -> &'static str {
        if !is_archive {
            "file"
        } else if self.compresses_payload() {
            "tar.gz"
        } else {
            "tar"
        }
    }
}
