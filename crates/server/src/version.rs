//! SDK version negotiation for the non-streaming response shape.

use std::fmt;
use std::str::FromStr;

/// Header carrying the caller's SDK version.
pub const SDK_VERSION_HEADER: &str = "x-latitude-sdk-version";

/// First SDK version that understands the current response shape.
pub const DEFAULT_LEGACY_THRESHOLD: SdkVersion = SdkVersion::new(5, 0, 0);

/// `major.minor.patch`. Missing components count as zero and any
/// pre-release or build suffix is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SdkVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SdkVersion {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid SDK version: {0:?}")]
pub struct InvalidVersion(pub String);

impl FromStr for SdkVersion {
    type Err = InvalidVersion;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidVersion(raw.to_string());
        let trimmed = raw.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let core = trimmed.split(['-', '+']).next().unwrap_or_default();
        if core.is_empty() {
            return Err(invalid());
        }

        let mut parts = [0u64; 3];
        for (i, part) in core.split('.').enumerate() {
            if i >= parts.len() {
                return Err(invalid());
            }
            parts[i] = part.parse().map_err(|_| invalid())?;
        }
        Ok(Self::new(parts[0], parts[1], parts[2]))
    }
}

impl fmt::Display for SdkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Which non-streaming body a caller gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// Response plus accumulated tool calls.
    Legacy,
    /// Response only.
    Current,
}

impl ResponseShape {
    /// Callers at or above `threshold` get the current shape. A missing or
    /// unparsable version is treated as legacy.
    pub fn negotiate(sdk_version: Option<&str>, threshold: SdkVersion) -> Self {
        match sdk_version.map(str::parse::<SdkVersion>) {
            Some(Ok(version)) if version >= threshold => Self::Current,
            Some(Err(e)) => {
                tracing::debug!(error = %e, "Treating caller as legacy SDK");
                Self::Legacy
            }
            _ => Self::Legacy,
        }
    }
}
