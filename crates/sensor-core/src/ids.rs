//! Type-safe identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Server-assigned identifier of one connected client process.
///
/// Obtained once via `GET_ID` and reused for every sensor the process opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(i32);

impl ClientId {
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    pub const fn as_i32(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Client-local identifier of one open binding to a sensor.
///
/// Unique while alive; the smallest free value is reused after disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(i32);

impl Handle {
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    pub const fn as_i32(self) -> i32 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
