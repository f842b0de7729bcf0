//! Permission bitmask checked when a client opens a sensor.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;

use crate::error::ModuleError;

/// Bitmask of permissions held by a client or required by a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(u32);

impl Permission {
    pub const NONE: Permission = Permission(0);
    /// Ordinary motion and environment sensors.
    pub const STANDARD: Permission = Permission(1 << 0);
    /// Biometric sensors (e.g. heart rate).
    pub const BIO: Permission = Permission(1 << 1);
    pub const ALL: Permission = Permission(Self::STANDARD.0 | Self::BIO.0);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if every bit of `required` is held by `self`.
    pub const fn allows(self, required: Permission) -> bool {
        self.0 & required.0 == required.0
    }
}

impl BitOr for Permission {
    type Output = Permission;

    fn bitor(self, rhs: Self) -> Self::Output {
        Permission(self.0 | rhs.0)
    }
}

impl FromStr for Permission {
    type Err = ModuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::NONE),
            "standard" => Ok(Self::STANDARD),
            "bio" => Ok(Self::BIO),
            "all" => Ok(Self::ALL),
            other => Err(ModuleError::InvalidArgument(format!(
                "unknown permission '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows() {
        assert!(Permission::ALL.allows(Permission::BIO));
        assert!(Permission::STANDARD.allows(Permission::NONE));
        assert!(!Permission::STANDARD.allows(Permission::BIO));
        assert!((Permission::STANDARD | Permission::BIO).allows(Permission::ALL));
    }

    #[test]
    fn test_parse() {
        assert_eq!("bio".parse::<Permission>().ok(), Some(Permission::BIO));
        assert_eq!(" Standard ".parse::<Permission>().ok(), Some(Permission::STANDARD));
        assert!("root".parse::<Permission>().is_err());
    }
}
