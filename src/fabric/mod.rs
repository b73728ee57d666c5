//! The connection-manager transport the client drives.
//!
//! A [`Fabric`] bundles the collaborator calls of an RDMA CM client:
//! address resolution, endpoint (queue pair) creation, memory registration,
//! work request posting, connection establishment and completion polling,
//! plus the matching release calls. Release calls consume their handle, so
//! no resource can be released twice.
//!
//! Two backends are provided:
//!
//! - [`sim::SimFabric`], an in-process loopback peer with fault injection
//!   and a call log;
//! - `rdmacm::CmFabric` (feature `rdmacm`), backed by `librdmacm`.

mod caps;
mod wc;

pub mod sim;

#[cfg(feature = "rdmacm")]
pub mod rdmacm;

use std::io;

use thiserror::Error;

pub use self::caps::*;
pub use self::wc::*;

/// Address resolution failure, as reported by the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct ResolveError {
    /// Resolver return code (a `getaddrinfo` code for the real backend).
    /// Never zero.
    pub code: i32,

    /// Human-readable reason.
    pub reason: String,
}

/// The transport collaborator of the client.
///
/// All calls are synchronous. Only the `poll_*` calls are non-blocking: they
/// try once and return `Ok(None)` when no completion is available yet.
pub trait Fabric {
    /// Resolved addressing information.
    type AddrInfo;

    /// A connection endpoint (CM id with its queue pair and CQs).
    type Endpoint;

    /// A memory registration handle.
    type Mr;

    /// Resolve `host:port` for the reliable-connected port space.
    fn resolve(&self, host: &str, port: &str) -> Result<Self::AddrInfo, ResolveError>;

    /// Create an endpoint bound to the resolved address, asking for `caps`.
    /// Return the endpoint and the capabilities actually granted.
    fn create_ep(&self, info: &Self::AddrInfo, caps: EpCaps)
        -> io::Result<(Self::Endpoint, EpCaps)>;

    /// Register `len` bytes at `addr` for send/recv messaging on `ep`.
    ///
    /// # Safety
    ///
    /// - `addr..addr + len` must be a valid, writable allocation.
    /// - The memory must stay valid (not freed, not moved) until the returned
    ///   handle is passed to [`Fabric::dereg_mr`].
    unsafe fn reg_msgs(&self, ep: &Self::Endpoint, addr: *mut u8, len: usize)
        -> io::Result<Self::Mr>;

    /// Post a receive work request covering the whole region of `mr`.
    fn post_recv(&self, ep: &Self::Endpoint, wr_id: u64, mr: &Self::Mr) -> io::Result<()>;

    /// Post a send work request for `buf`.
    ///
    /// With [`SendFlags::INLINE`], the payload is copied into the work request
    /// and `mr` may be `None`; otherwise `mr` must cover `buf`.
    ///
    /// # Safety
    ///
    /// Unless sent inline, `buf` must stay valid until the send completion is
    /// polled or the endpoint is destroyed.
    unsafe fn post_send(
        &self,
        ep: &Self::Endpoint,
        wr_id: u64,
        buf: &[u8],
        mr: Option<&Self::Mr>,
        flags: SendFlags,
    ) -> io::Result<()>;

    /// Perform the connection handshake. Blocks until the connection is
    /// established or refused.
    fn connect(&self, ep: &Self::Endpoint) -> io::Result<()>;

    /// Try once to reap a receive completion.
    fn poll_recv_comp(&self, ep: &Self::Endpoint) -> io::Result<Option<Wc>>;

    /// Try once to reap a send completion.
    fn poll_send_comp(&self, ep: &Self::Endpoint) -> io::Result<Option<Wc>>;

    /// Tear down an established connection.
    fn disconnect(&self, ep: &Self::Endpoint) -> io::Result<()>;

    /// Deregister a memory region.
    fn dereg_mr(&self, mr: Self::Mr) -> io::Result<()>;

    /// Destroy an endpoint and its queues.
    fn destroy_ep(&self, ep: Self::Endpoint);

    /// Release resolved addressing information.
    fn free_addrinfo(&self, info: Self::AddrInfo);
}
