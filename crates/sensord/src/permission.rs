//! Permission lookup for connecting peers.

use std::collections::HashSet;

use tokio::net::UnixStream;

use sensor_core::Permission;

/// Credentials of the process on the other end of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerInfo {
    pub uid: u32,
    pub pid: Option<i32>,
}

impl PeerInfo {
    pub fn from_stream(stream: &UnixStream) -> std::io::Result<Self> {
        let cred = stream.peer_cred()?;
        Ok(Self {
            uid: cred.uid(),
            pid: cred.pid(),
        })
    }
}

/// Resolves the permission bitmask a peer holds.
pub trait PermissionChecker: Send + Sync {
    fn permission(&self, peer: &PeerInfo) -> Permission;
}

/// Grants everything to root and configured uids, `STANDARD` to the rest.
#[derive(Debug, Clone, Default)]
pub struct UidPermissionChecker {
    privileged: HashSet<u32>,
}

impl UidPermissionChecker {
    pub fn new(privileged: impl IntoIterator<Item = u32>) -> Self {
        Self {
            privileged: privileged.into_iter().collect(),
        }
    }
}

impl PermissionChecker for UidPermissionChecker {
    fn permission(&self, peer: &PeerInfo) -> Permission {
        if peer.uid == 0 || self.privileged.contains(&peer.uid) {
            Permission::ALL
        } else {
            Permission::STANDARD
        }
    }
}

/// Grants the same permission to every peer.
#[derive(Debug, Clone, Copy)]
pub struct FixedPermission(pub Permission);

impl PermissionChecker for FixedPermission {
    fn permission(&self, _peer: &PeerInfo) -> Permission {
        self.0
    }
}
