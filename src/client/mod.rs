//! The client pipeline: resolve, create the endpoint, register memory, post
//! the receive, connect, wait for the message, verify it.
//!
//! All transport resources of a run are owned by one [`Session`]. Dropping the
//! session releases whatever it has acquired so far, in reverse acquisition
//! order, on every exit path.

pub mod poll;
pub mod report;
pub mod verify;

use quanta::Instant;

use self::poll::{Poller, Queue};
use self::report::Report;
use self::verify::{fill_pattern, TimingSample};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::fabric::{EpCaps, Fabric, SendFlags, Wc};

/// Work request id of the receive.
pub const RECV_WR_ID: u64 = 1;

/// Work request id of the send.
pub const SEND_WR_ID: u64 = 2;

/// Lifecycle of the session's endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// No endpoint yet.
    Absent,
    /// Created, not yet connecting.
    Created,
    /// `rdma_connect` in progress.
    Connecting,
    /// Handshake done. Teardown disconnects.
    Connected,
    /// Handshake failed. Teardown skips the disconnect.
    Failed,
    /// Destroyed by teardown.
    Destroyed,
}

/// Transport resources of one client run.
///
/// Every step method records what it acquired, so that [`Drop`] can release
/// exactly that. Calling a step before the resource it depends on exists
/// yields [`ClientError::OutOfOrder`].
pub struct Session<'f, F: Fabric> {
    fabric: &'f F,

    info: Option<F::AddrInfo>,
    ep: Option<F::Endpoint>,
    caps: Option<EpCaps>,
    recv_mr: Option<F::Mr>,
    send_mr: Option<F::Mr>,
    state: EndpointState,

    // Dropped after `Drop::drop` has deregistered them, receive buffer first.
    recv_buf: Box<[u8]>,
    send_buf: Box<[u8]>,
}

impl<'f, F: Fabric> Session<'f, F> {
    /// Allocate zeroed send and receive buffers of `msg_size` bytes each.
    pub fn new(fabric: &'f F, msg_size: usize) -> Self {
        Session {
            fabric,
            info: None,
            ep: None,
            caps: None,
            recv_mr: None,
            send_mr: None,
            state: EndpointState::Absent,
            recv_buf: vec![0u8; msg_size].into_boxed_slice(),
            send_buf: vec![0u8; msg_size].into_boxed_slice(),
        }
    }

    /// Capabilities granted at endpoint creation.
    pub fn caps(&self) -> Option<&EpCaps> {
        self.caps.as_ref()
    }

    /// Whether the whole send buffer fits in the granted inline threshold.
    pub fn inline(&self) -> bool {
        self.caps
            .is_some_and(|caps| caps.supports_inline(self.send_buf.len()))
    }

    pub fn state(&self) -> EndpointState {
        self.state
    }

    /// The receive buffer.
    pub fn recv_buf(&self) -> &[u8] {
        &self.recv_buf
    }

    /// Fill the send buffer with the pattern the peer expects.
    pub fn fill_send_buf(&mut self) {
        fill_pattern(&mut self.send_buf);
    }

    fn ep(&self, op: &'static str) -> Result<&F::Endpoint, ClientError> {
        self.ep.as_ref().ok_or(ClientError::OutOfOrder {
            op,
            missing: "endpoint",
        })
    }

    /// Resolve the server address.
    pub fn resolve(&mut self, host: &str, port: &str) -> Result<(), ClientError> {
        const OP: &str = "rdma_getaddrinfo";

        let info = self.fabric.resolve(host, port).map_err(|source| {
            log::error!("rdma_client: cannot resolve {}:{}: {}", host, port, source);
            ClientError::Resolution { op: OP, source }
        })?;
        log::debug!("rdma_client: resolved {}:{}", host, port);
        self.info = Some(info);
        Ok(())
    }

    /// Create the endpoint, asking for `requested`. Returns the granted
    /// capabilities.
    pub fn create_endpoint(&mut self, requested: EpCaps) -> Result<EpCaps, ClientError> {
        const OP: &str = "rdma_create_ep";

        let info = self.info.as_ref().ok_or(ClientError::OutOfOrder {
            op: OP,
            missing: "address info",
        })?;
        let (ep, granted) = self.fabric.create_ep(info, requested).map_err(|source| {
            log::error!("rdma_client: cannot create endpoint: {}", source);
            ClientError::Creation { op: OP, source }
        })?;
        log::info!(
            "rdma_client: endpoint created, max_inline_data {} (requested {})",
            granted.max_inline_data,
            requested.max_inline_data
        );
        self.ep = Some(ep);
        self.caps = Some(granted);
        self.state = EndpointState::Created;
        Ok(granted)
    }

    /// Register the receive buffer.
    pub fn register_recv(&mut self) -> Result<(), ClientError> {
        const OP: &str = "rdma_reg_msgs for recv_msg";

        let addr = self.recv_buf.as_mut_ptr();
        let len = self.recv_buf.len();
        let ep = self.ep(OP)?;

        // SAFETY: `recv_buf` is a live heap allocation of `len` bytes that is
        // only freed after `Drop::drop` has deregistered it.
        let mr = unsafe { self.fabric.reg_msgs(ep, addr, len) }.map_err(|source| {
            log::error!("rdma_client: cannot register recv_msg: {}", source);
            ClientError::Registration { op: OP, source }
        })?;
        log::debug!("rdma_client: registered recv_msg ({} bytes)", len);
        self.recv_mr = Some(mr);
        Ok(())
    }

    /// Register the send buffer. Only needed when sends cannot go inline.
    pub fn register_send(&mut self) -> Result<(), ClientError> {
        const OP: &str = "rdma_reg_msgs for send_msg";

        let addr = self.send_buf.as_mut_ptr();
        let len = self.send_buf.len();
        let ep = self.ep(OP)?;

        // SAFETY: as for the receive buffer.
        let mr = unsafe { self.fabric.reg_msgs(ep, addr, len) }.map_err(|source| {
            log::error!("rdma_client: cannot register send_msg: {}", source);
            ClientError::Registration { op: OP, source }
        })?;
        log::debug!("rdma_client: registered send_msg ({} bytes)", len);
        self.send_mr = Some(mr);
        Ok(())
    }

    /// Post the receive. Must happen before [`Session::connect`], or a
    /// message arriving right after the handshake has nowhere to land.
    pub fn post_recv(&mut self) -> Result<(), ClientError> {
        const OP: &str = "rdma_post_recv";

        let ep = self.ep(OP)?;
        let mr = self.recv_mr.as_ref().ok_or(ClientError::OutOfOrder {
            op: OP,
            missing: "recv_msg registration",
        })?;
        self.fabric.post_recv(ep, RECV_WR_ID, mr).map_err(|source| {
            log::error!("rdma_client: cannot post recv: {}", source);
            ClientError::Post { op: OP, source }
        })
    }

    /// Connect to the server. Blocks until the handshake finishes.
    pub fn connect(&mut self) -> Result<(), ClientError> {
        const OP: &str = "rdma_connect";

        let ep = self.ep.as_ref().ok_or(ClientError::OutOfOrder {
            op: OP,
            missing: "endpoint",
        })?;
        self.state = EndpointState::Connecting;
        match self.fabric.connect(ep) {
            Ok(()) => {
                log::info!("rdma_client: connected");
                self.state = EndpointState::Connected;
                Ok(())
            }
            Err(source) => {
                log::error!("rdma_client: cannot connect: {}", source);
                self.state = EndpointState::Failed;
                Err(ClientError::Connect { op: OP, source })
            }
        }
    }

    /// Send the send buffer and wait for the send completion.
    pub fn send(&mut self, poller: &Poller<'_, F>) -> Result<Wc, ClientError> {
        const OP: &str = "rdma_post_send";

        let ep = self.ep(OP)?;
        let inline = self.inline();
        let flags = if inline {
            SendFlags::SIGNALED | SendFlags::INLINE
        } else {
            SendFlags::SIGNALED
        };
        if !inline && self.send_mr.is_none() {
            return Err(ClientError::OutOfOrder {
                op: OP,
                missing: "send_msg registration",
            });
        }

        // SAFETY: `send_buf` outlives the endpoint, and a non-inline send is
        // covered by `send_mr`, which is only deregistered in `Drop::drop`.
        unsafe {
            self.fabric
                .post_send(ep, SEND_WR_ID, &self.send_buf, self.send_mr.as_ref(), flags)
        }
        .map_err(|source| {
            log::error!("rdma_client: cannot post send: {}", source);
            ClientError::Post { op: OP, source }
        })?;

        poller.wait(ep, Queue::Send).map_err(|source| {
            log::error!("rdma_client: send did not complete: {}", source);
            ClientError::Completion {
                op: "rdma_get_send_comp",
                source,
            }
        })
    }

    /// Wait for the receive completion.
    pub fn wait_recv(&mut self, poller: &Poller<'_, F>) -> Result<Wc, ClientError> {
        const OP: &str = "rdma_get_recv_comp";

        let ep = self.ep(OP)?;
        let wc = poller.wait(ep, Queue::Recv).map_err(|source| {
            log::error!("rdma_client: recv did not complete: {}", source);
            ClientError::Completion { op: OP, source }
        })?;
        log::debug!("rdma_client: recv completed, {:?}", wc);
        Ok(wc)
    }
}

impl<F: Fabric> Drop for Session<'_, F> {
    fn drop(&mut self) {
        if let (Some(ep), EndpointState::Connected) = (&self.ep, self.state) {
            if let Err(e) = self.fabric.disconnect(ep) {
                log::warn!("rdma_client: rdma_disconnect failed: {}", e);
            }
        }
        if let Some(mr) = self.send_mr.take() {
            if let Err(e) = self.fabric.dereg_mr(mr) {
                log::warn!("rdma_client: rdma_dereg_mr for send_msg failed: {}", e);
            }
        }
        if let Some(mr) = self.recv_mr.take() {
            if let Err(e) = self.fabric.dereg_mr(mr) {
                log::warn!("rdma_client: rdma_dereg_mr for recv_msg failed: {}", e);
            }
        }
        if let Some(ep) = self.ep.take() {
            self.fabric.destroy_ep(ep);
            self.state = EndpointState::Destroyed;
        }
        if let Some(info) = self.info.take() {
            self.fabric.free_addrinfo(info);
        }
        log::debug!("rdma_client: session released");
    }
}

/// Run the client once against `fabric`.
///
/// On success the returned report carries the verification result; a
/// payload mismatch is not an error. All resources are released before this
/// function returns, whatever the outcome.
pub fn run<F: Fabric>(fabric: &F, cfg: &ClientConfig) -> Result<Report, ClientError> {
    cfg.validate()?;

    let mut session = Session::new(fabric, cfg.msg_size);
    session.resolve(&cfg.server, &cfg.port)?;
    session.create_endpoint(EpCaps::single_shot(cfg.max_inline_data))?;

    let inline = session.inline();
    if !inline {
        log::warn!("rdma_client: device doesn't support IBV_SEND_INLINE, using sge sends");
    }

    session.register_recv()?;
    if !inline {
        session.register_send()?;
    }
    if cfg.send {
        session.fill_send_buf();
    }

    let poller = Poller::new(fabric, cfg.poll_strategy());

    let start = Instant::now();
    session.post_recv()?;
    session.connect()?;
    if cfg.send {
        session.send(&poller)?;
    }
    session.wait_recv(&poller)?;
    let end = Instant::now();

    Ok(Report::new(session.recv_buf(), TimingSample::new(start, end)))
}

/// Process status for the outcome of [`run`].
pub fn exit_status(result: &Result<Report, ClientError>, fail_on_mismatch: bool) -> i32 {
    match result {
        Ok(report) if fail_on_mismatch && !report.all_same() => 1,
        Ok(_) => 0,
        Err(e) => e.exit_code(),
    }
}
