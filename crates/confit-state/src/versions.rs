use crate::StateError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A kernel version, compared numerically by (major, minor, patch).
///
/// Parsing is lenient about distro decoration: `5.15.0-91-generic` and
/// `4.18.0-477.el8.x86_64` both parse, keeping only the leading numeric
/// components. A missing patch (or minor) component defaults to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KernelVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

/// Minimum kernel for the BBR congestion control module (mainlined in 4.9).
pub const BBR_MINIMUM: KernelVersion = KernelVersion {
    major: 4,
    minor: 9,
    patch: 0,
};

impl KernelVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for KernelVersion {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || StateError::InvalidKernelVersion(s.to_owned());

        // Keep the leading dotted numeric prefix, dropping `-91-generic`
        // style suffixes and anything after the first non-numeric char
        // inside a component.
        let mut parts = [0u32; 3];
        let mut count = 0;
        for component in s.split('.').take(3) {
            let digits: String = component.chars().take_while(char::is_ascii_digit).collect();
            if digits.is_empty() {
                break;
            }
            parts[count] = digits.parse().map_err(|_| bad())?;
            count += 1;
            // A suffix like `0-91-generic` ends the version string.
            if digits.len() != component.len() {
                break;
            }
        }
        if count == 0 {
            return Err(bad());
        }
        Ok(Self {
            major: parts[0],
            minor: parts[1],
            patch: parts[2],
        })
    }
}
