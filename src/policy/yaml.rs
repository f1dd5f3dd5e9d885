//! YAML encoding of Policy documents.

use std::path::Path;

use semver::{Version, VersionReq};

use crate::error::{PolicyError, PolicyResult, ValidationError};

use super::Policy;

/// API version written by this crate.
pub const CURRENT_API_VERSION: &str = "0.2.0";

/// API versions accepted when loading a document.
pub const SUPPORTED_API_VERSIONS: &str = "^0.2";

impl Policy {
    /// Parses a Policy document and checks its API version.
    ///
    /// # Errors
    /// - `InvalidDocument` if the YAML does not describe a Policy
    /// - `MissingField` if `apiVersion` is empty
    /// - `UnsupportedApiVersion` if `apiVersion` is outside [`SUPPORTED_API_VERSIONS`]
    pub fn from_yaml_str(raw: &str) -> Result<Self, ValidationError> {
        let policy: Self = serde_yaml::from_str(raw).map_err(|e| ValidationError::InvalidDocument {
            reason: e.to_string(),
        })?;
        policy.validate_api_version()?;
        Ok(policy)
    }

    /// Reads and parses a Policy document from disk.
    ///
    /// # Errors
    /// - `Io` if the file cannot be read
    /// - `Validation` for the reasons listed on [`Policy::from_yaml_str`]
    pub fn from_yaml_file(path: impl AsRef<Path>) -> PolicyResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(Self::from_yaml_str(&raw)?)
    }

    /// Serializes the Policy to YAML.
    ///
    /// # Errors
    /// Returns `Serialization` if a parameter value cannot be encoded.
    pub fn to_yaml_string(&self) -> PolicyResult<String> {
        serde_yaml::to_string(self).map_err(|e| PolicyError::Serialization {
            message: format!("while marshaling policy to YAML: {e}"),
        })
    }

    /// Checks that `api_version` is supported.
    ///
    /// # Errors
    /// - `MissingField` if `apiVersion` is empty
    /// - `UnsupportedApiVersion` if it is outside [`SUPPORTED_API_VERSIONS`]
    pub fn validate_api_version(&self) -> Result<(), ValidationError> {
        let raw = self.api_version.trim();
        if raw.is_empty() {
            return Err(ValidationError::MissingField {
                field: "apiVersion".to_string(),
            });
        }

        let unsupported = || ValidationError::UnsupportedApiVersion {
            version: raw.to_string(),
            supported: SUPPORTED_API_VERSIONS.to_string(),
        };

        let version = Version::parse(raw).map_err(|_| unsupported())?;
        let req = VersionReq::parse(SUPPORTED_API_VERSIONS).map_err(|e| ValidationError::InvalidDocument {
            reason: e.to_string(),
        })?;

        if req.matches(&version) {
            Ok(())
        } else {
            Err(unsupported())
        }
    }
}
