//! Port allocation for managed instances.
//!
//! A port is handed out only when it is both unassigned in our own records
//! and bindable on the host right now. Either check alone is not enough:
//! a stopped instance keeps its port reserved, and foreign processes can
//! occupy ports we never assigned.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PortError {
    #[error("invalid port range {start}-{end}")]
    InvalidRange { start: u16, end: u16 },

    #[error("no free ports in range {start}-{end}")]
    Exhausted { start: u16, end: u16 },

    #[error("port {port} is not available: {source}")]
    Unavailable {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

/// Inclusive port range configured for new instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        Self { start: 25565, end: 25665 }
    }
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Result<Self, PortError> {
        let range = Self { start, end };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> Result<(), PortError> {
        if self.start == 0 || self.start > self.end {
            return Err(PortError::InvalidRange { start: self.start, end: self.end });
        }
        Ok(())
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }
}

/// Find the first port in `range` that is not in `assigned` and is bindable.
///
/// Ports are tried in ascending order; the search never wraps around.
pub fn allocate(range: PortRange, assigned: &HashSet<u16>) -> Result<u16, PortError> {
    range.validate()?;

    for port in range.start..=range.end {
        if assigned.contains(&port) {
            continue;
        }
        match check_available(port) {
            Ok(()) => {
                tracing::debug!("Allocated port {} from range {}-{}", port, range.start, range.end);
                return Ok(port);
            }
            Err(e) => tracing::debug!("Skipping port {}: {}", port, e),
        }
    }

    Err(PortError::Exhausted { start: range.start, end: range.end })
}

/// Probe a port by binding it on all interfaces and releasing it again.
///
/// `SO_REUSEADDR` is left off so a port held by any listener counts as busy.
pub fn check_available(port: u16) -> Result<(), PortError> {
    let unavailable = |source| PortError::Unavailable { port, source };

    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).map_err(unavailable)?;
    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&addr.into()).map_err(unavailable)?;
    socket.listen(1).map_err(unavailable)?;
    drop(socket);
    Ok(())
}
