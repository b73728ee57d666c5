//! In-process loopback fabric.
//!
//! [`SimFabric`] plays both the local transport and the remote server: once
//! the client connects, the simulated server immediately sends one message
//! of the `b[i] = i mod 256` pattern, which lands directly in the posted
//! receive memory. Every collaborator call is appended to a call log, and a
//! single [`FailPoint`] can be armed to make one operation fail.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::io;
use std::slice;

use super::*;
use crate::client::verify::fill_pattern;
use crate::utils::interop::*;

/// Operation at which the simulated transport fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    /// Name resolution.
    Resolve,
    /// Endpoint creation.
    CreateEndpoint,
    /// The n-th (0-based) memory registration.
    Register(usize),
    /// Posting a receive.
    PostRecv,
    /// Posting a send.
    PostSend,
    /// The connection handshake.
    Connect,
    /// Polling the receive CQ.
    PollRecv,
    /// Polling the send CQ.
    PollSend,
    /// The receive completes with the given non-success status.
    RecvStatus(WcStatus),
    /// Disconnecting (teardown keeps going).
    Disconnect,
    /// The n-th (0-based) memory deregistration (teardown keeps going).
    Deregister(usize),
}

/// A recorded collaborator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Resolve,
    CreateEp,
    /// Registration with the id of the resulting handle.
    RegMsgs(usize),
    /// Receive posted on the given registration.
    PostRecv(usize),
    PostSend { inline: bool },
    Connect,
    PollRecv,
    PollSend,
    Disconnect,
    /// Deregistration of the given handle id.
    DeregMr(usize),
    DestroyEp,
    FreeAddrInfo,
}

/// Simulated device and peer behavior.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Device limits checked at endpoint creation.
    pub limits: EpCaps,

    /// Inline threshold the device grants, regardless of the request.
    pub granted_inline: u32,

    /// Number of empty polls before a completion becomes visible.
    pub pending_polls: u64,

    /// Size of the message the peer sends. `None` fills the posted buffer.
    pub payload_len: Option<usize>,

    /// `(index, value)` overrides applied to the pattern on the wire.
    pub corruptions: Vec<(usize, u8)>,

    /// Armed failure.
    pub fail: Option<FailPoint>,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            limits: EpCaps {
                max_send_wr: 16,
                max_recv_wr: 16,
                max_send_sge: 4,
                max_recv_sge: 4,
                max_inline_data: 256,
            },
            granted_inline: 256,
            pending_polls: 0,
            payload_len: None,
            corruptions: Vec::new(),
            fail: None,
        }
    }
}

impl SimConfig {
    /// Set the inline threshold the device grants.
    pub fn granted_inline(mut self, granted_inline: u32) -> Self {
        self.granted_inline = granted_inline;
        self
    }

    /// Set the number of empty polls before each completion shows up.
    pub fn pending_polls(mut self, pending_polls: u64) -> Self {
        self.pending_polls = pending_polls;
        self
    }

    /// Set the size of the message the peer sends.
    pub fn payload_len(mut self, payload_len: usize) -> Self {
        self.payload_len = Some(payload_len);
        self
    }

    /// Corrupt one byte of the message on the wire.
    pub fn corrupt(mut self, index: usize, value: u8) -> Self {
        self.corruptions.push((index, value));
        self
    }

    /// Arm a failure.
    pub fn fail_at(mut self, fail: FailPoint) -> Self {
        self.fail = Some(fail);
        self
    }

    /// Set the device limits.
    pub fn limits(mut self, limits: EpCaps) -> Self {
        self.limits = limits;
        self
    }
}

/// Resolved address of the simulated peer.
#[derive(Debug)]
pub struct SimAddrInfo {
    host: String,
    port: u16,
}

impl SimAddrInfo {
    /// Resolved host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Resolved port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Simulated endpoint.
#[derive(Debug)]
pub struct SimEndpoint {
    caps: EpCaps,
}

impl SimEndpoint {
    /// Granted capabilities.
    pub fn caps(&self) -> &EpCaps {
        &self.caps
    }
}

/// Simulated memory registration.
#[derive(Debug)]
pub struct SimMr {
    id: usize,
    addr: *mut u8,
    len: usize,
}

impl SimMr {
    /// Registration id, in registration order.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Registered length.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.len
    }
}

#[derive(Debug)]
struct PostedRecv {
    wr_id: u64,
    mr: usize,
    addr: *mut u8,
    len: usize,
}

#[derive(Debug, Default)]
struct SimState {
    log: Vec<Call>,
    next_mr: usize,
    deregs: usize,
    live_mrs: BTreeSet<usize>,
    live_eps: usize,
    live_addrinfos: usize,

    recv: Option<PostedRecv>,
    recv_done: Option<Wc>,
    recv_polls: u64,
    /// The peer's message arrived while no receive was posted.
    lost: bool,

    send_done: Option<Wc>,
    sends_outstanding: u32,
    send_polls: u64,

    connected: bool,
}

/// In-process loopback fabric. Single-threaded.
#[derive(Debug, Default)]
pub struct SimFabric {
    cfg: SimConfig,
    state: RefCell<SimState>,
}

impl SimFabric {
    /// Create a simulated fabric.
    pub fn new(cfg: SimConfig) -> Self {
        Self {
            cfg,
            state: RefCell::new(SimState::default()),
        }
    }

    /// Snapshot of the call log.
    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().log.clone()
    }

    /// Number of resources (address infos, endpoints, registrations) that
    /// have been acquired but not released.
    pub fn live_resources(&self) -> usize {
        let st = self.state.borrow();
        st.live_addrinfos + st.live_eps + st.live_mrs.len()
    }

    fn record(&self, call: Call) {
        self.state.borrow_mut().log.push(call);
    }

    fn armed(&self, point: FailPoint) -> bool {
        self.cfg.fail == Some(point)
    }

    /// The peer sends its message into whatever receive is posted.
    fn deliver(&self, st: &mut SimState) {
        let Some(recv) = st.recv.take() else {
            log::debug!("sim: peer message arrived with no receive posted");
            st.lost = true;
            return;
        };

        let len = self.cfg.payload_len.unwrap_or(recv.len);
        if len > recv.len {
            st.recv_done = Some(Wc::new(recv.wr_id, WcOpcode::Recv, WcStatus::LocLenErr, 0));
            return;
        }

        // SAFETY: `recv.addr..recv.addr + recv.len` is registered memory that
        // the `reg_msgs` contract keeps alive until deregistration, nothing
        // else touches it while the receive is outstanding, and
        // `len <= recv.len`.
        let dst = unsafe { slice::from_raw_parts_mut(recv.addr, len) };
        fill_pattern(dst);
        for &(i, v) in &self.cfg.corruptions {
            if let Some(b) = dst.get_mut(i) {
                *b = v;
            }
        }

        let status = match self.cfg.fail {
            Some(FailPoint::RecvStatus(status)) => status,
            _ => WcStatus::Success,
        };
        st.recv_done = Some(Wc::new(recv.wr_id, WcOpcode::Recv, status, len as u32));
        log::trace!("sim: delivered {} bytes into MR #{}", len, recv.mr);
    }
}

impl Fabric for SimFabric {
    type AddrInfo = SimAddrInfo;
    type Endpoint = SimEndpoint;
    type Mr = SimMr;

    fn resolve(&self, host: &str, port: &str) -> Result<SimAddrInfo, ResolveError> {
        self.record(Call::Resolve);
        if self.armed(FailPoint::Resolve) || host.is_empty() {
            return Err(ResolveError {
                code: libc::EAI_NONAME,
                reason: gai_reason(libc::EAI_NONAME),
            });
        }
        let port = port.parse::<u16>().map_err(|_| ResolveError {
            code: libc::EAI_SERVICE,
            reason: gai_reason(libc::EAI_SERVICE),
        })?;

        self.state.borrow_mut().live_addrinfos += 1;
        Ok(SimAddrInfo {
            host: host.to_owned(),
            port,
        })
    }

    fn create_ep(&self, _info: &SimAddrInfo, caps: EpCaps) -> io::Result<(SimEndpoint, EpCaps)> {
        self.record(Call::CreateEp);
        if self.armed(FailPoint::CreateEndpoint) {
            return Err(io::Error::from_raw_os_error(libc::ENODEV));
        }
        caps.check(&self.cfg.limits)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let granted = EpCaps {
            max_inline_data: self.cfg.granted_inline,
            ..caps
        };
        self.state.borrow_mut().live_eps += 1;
        Ok((SimEndpoint { caps: granted }, granted))
    }

    unsafe fn reg_msgs(&self, _ep: &SimEndpoint, addr: *mut u8, len: usize) -> io::Result<SimMr> {
        let mut st = self.state.borrow_mut();
        let id = st.next_mr;
        st.next_mr += 1;
        st.log.push(Call::RegMsgs(id));

        if self.cfg.fail == Some(FailPoint::Register(id)) {
            return Err(io::Error::from_raw_os_error(libc::ENOMEM));
        }
        if addr.is_null() {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        st.live_mrs.insert(id);
        Ok(SimMr { id, addr, len })
    }

    fn post_recv(&self, ep: &SimEndpoint, wr_id: u64, mr: &SimMr) -> io::Result<()> {
        let mut st = self.state.borrow_mut();
        st.log.push(Call::PostRecv(mr.id));

        if self.armed(FailPoint::PostRecv) {
            return from_c_errno_explained(libc::ENOMEM, recv_err_explanation);
        }
        let outstanding = st.recv.is_some() as u32 + st.recv_done.is_some() as u32;
        if outstanding >= ep.caps.max_recv_wr {
            return from_c_errno_explained(libc::ENOMEM, recv_err_explanation);
        }
        if !st.live_mrs.contains(&mr.id) {
            return from_c_errno_explained(libc::EINVAL, recv_err_explanation);
        }

        st.recv = Some(PostedRecv {
            wr_id,
            mr: mr.id,
            addr: mr.addr,
            len: mr.len,
        });
        if st.lost {
            // The QP went to error when the early message was dropped.
            let recv = st.recv.take().map(|r| r.wr_id).unwrap_or(wr_id);
            st.recv_done = Some(Wc::new(recv, WcOpcode::Recv, WcStatus::WrFlushErr, 0));
        } else if st.connected {
            self.deliver(&mut st);
        }
        Ok(())
    }

    unsafe fn post_send(
        &self,
        ep: &SimEndpoint,
        wr_id: u64,
        buf: &[u8],
        mr: Option<&SimMr>,
        flags: SendFlags,
    ) -> io::Result<()> {
        let inline = flags.contains(SendFlags::INLINE);
        let mut st = self.state.borrow_mut();
        st.log.push(Call::PostSend { inline });

        if self.armed(FailPoint::PostSend) || !st.connected {
            return from_c_errno_explained(libc::EINVAL, send_err_explanation);
        }
        if st.sends_outstanding >= ep.caps.max_send_wr {
            return from_c_errno_explained(libc::ENOMEM, send_err_explanation);
        }
        if inline {
            if !ep.caps.supports_inline(buf.len()) {
                return from_c_errno_explained(libc::EINVAL, send_err_explanation);
            }
        } else {
            let covered = mr.is_some_and(|mr| {
                st.live_mrs.contains(&mr.id)
                    && (buf.as_ptr() as usize) >= (mr.addr as usize)
                    && (buf.as_ptr() as usize + buf.len()) <= (mr.addr as usize + mr.len)
            });
            if !covered {
                return from_c_errno_explained(libc::EINVAL, send_err_explanation);
            }
        }

        st.sends_outstanding += 1;
        st.send_done = Some(Wc::new(
            wr_id,
            WcOpcode::Send,
            WcStatus::Success,
            buf.len() as u32,
        ));
        Ok(())
    }

    fn connect(&self, _ep: &SimEndpoint) -> io::Result<()> {
        self.record(Call::Connect);
        if self.armed(FailPoint::Connect) {
            return Err(io::Error::from_raw_os_error(libc::ECONNREFUSED));
        }

        let mut st = self.state.borrow_mut();
        st.connected = true;
        self.deliver(&mut st);
        Ok(())
    }

    fn poll_recv_comp(&self, _ep: &SimEndpoint) -> io::Result<Option<Wc>> {
        let mut st = self.state.borrow_mut();
        st.log.push(Call::PollRecv);
        if self.armed(FailPoint::PollRecv) {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        if st.recv_done.is_none() {
            return Ok(None);
        }
        if st.recv_polls < self.cfg.pending_polls {
            st.recv_polls += 1;
            return Ok(None);
        }
        st.recv_polls = 0;
        Ok(st.recv_done.take())
    }

    fn poll_send_comp(&self, _ep: &SimEndpoint) -> io::Result<Option<Wc>> {
        let mut st = self.state.borrow_mut();
        st.log.push(Call::PollSend);
        if self.armed(FailPoint::PollSend) {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        if st.send_done.is_none() {
            return Ok(None);
        }
        if st.send_polls < self.cfg.pending_polls {
            st.send_polls += 1;
            return Ok(None);
        }
        st.send_polls = 0;
        st.sends_outstanding -= 1;
        Ok(st.send_done.take())
    }

    fn disconnect(&self, _ep: &SimEndpoint) -> io::Result<()> {
        let mut st = self.state.borrow_mut();
        st.log.push(Call::Disconnect);
        st.connected = false;
        if self.armed(FailPoint::Disconnect) {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        Ok(())
    }

    fn dereg_mr(&self, mr: SimMr) -> io::Result<()> {
        let mut st = self.state.borrow_mut();
        st.log.push(Call::DeregMr(mr.id));
        let nth = st.deregs;
        st.deregs += 1;

        if !st.live_mrs.remove(&mr.id) {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        if st.recv.as_ref().is_some_and(|r| r.mr == mr.id) {
            st.recv = None;
        }
        if self.cfg.fail == Some(FailPoint::Deregister(nth)) {
            return Err(io::Error::from_raw_os_error(libc::EBUSY));
        }
        Ok(())
    }

    fn destroy_ep(&self, _ep: SimEndpoint) {
        let mut st = self.state.borrow_mut();
        st.log.push(Call::DestroyEp);
        st.live_eps -= 1;
        st.recv = None;
        st.recv_done = None;
        st.send_done = None;
    }

    fn free_addrinfo(&self, _info: SimAddrInfo) {
        let mut st = self.state.borrow_mut();
        st.log.push(Call::FreeAddrInfo);
        st.live_addrinfos -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(fabric: &SimFabric) -> (SimAddrInfo, SimEndpoint) {
        let info = fabric.resolve("127.0.0.1", "7471").unwrap();
        let (ep, _) = fabric.create_ep(&info, EpCaps::single_shot(160)).unwrap();
        (info, ep)
    }

    #[test]
    fn test_resolve() {
        let fabric = SimFabric::default();
        let info = fabric.resolve("10.0.0.1", "7471").unwrap();
        assert_eq!(info.host(), "10.0.0.1");
        assert_eq!(info.port(), 7471);

        let err = fabric.resolve("10.0.0.1", "not-a-port").unwrap_err();
        assert_eq!(err.code, libc::EAI_SERVICE);

        let fabric = SimFabric::new(SimConfig::default().fail_at(FailPoint::Resolve));
        let err = fabric.resolve("10.0.0.1", "7471").unwrap_err();
        assert_eq!(err.code, libc::EAI_NONAME);
    }

    #[test]
    fn test_caps_granted() {
        let fabric = SimFabric::new(SimConfig::default().granted_inline(64));
        let info = fabric.resolve("h", "1").unwrap();
        let (_ep, granted) = fabric.create_ep(&info, EpCaps::single_shot(160)).unwrap();
        assert_eq!(granted.max_inline_data, 64);
        assert_eq!(granted.max_recv_wr, 1);

        let too_many = EpCaps {
            max_send_wr: 1024,
            ..EpCaps::single_shot(0)
        };
        let err = fabric.create_ep(&info, too_many).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_loopback_recv() {
        let fabric = SimFabric::new(SimConfig::default().pending_polls(2).corrupt(3, 0xFF));
        let (_info, ep) = setup(&fabric);

        let mut buf = vec![0u8; 512];
        let mr = unsafe { fabric.reg_msgs(&ep, buf.as_mut_ptr(), buf.len()) }.unwrap();
        fabric.post_recv(&ep, 9, &mr).unwrap();
        fabric.connect(&ep).unwrap();

        assert_eq!(fabric.poll_recv_comp(&ep).unwrap(), None);
        assert_eq!(fabric.poll_recv_comp(&ep).unwrap(), None);
        let wc = fabric.poll_recv_comp(&ep).unwrap().unwrap();
        assert_eq!(wc.wr_id(), 9);
        assert_eq!(wc.ok(), Ok(512));

        fabric.dereg_mr(mr).unwrap();
        assert_eq!(&buf[..5], &[0, 1, 2, 0xFF, 4]);
        assert_eq!(buf[511], 255);
    }

    #[test]
    fn test_one_outstanding_recv() {
        let fabric = SimFabric::default();
        let (_info, ep) = setup(&fabric);

        let mut buf = vec![0u8; 16];
        let mr = unsafe { fabric.reg_msgs(&ep, buf.as_mut_ptr(), buf.len()) }.unwrap();
        fabric.post_recv(&ep, 0, &mr).unwrap();
        let err = fabric.post_recv(&ep, 1, &mr).unwrap_err();
        assert!(err.to_string().starts_with("recv queue is full"));
        fabric.dereg_mr(mr).unwrap();
    }

    #[test]
    fn test_message_lost_without_recv() {
        let fabric = SimFabric::default();
        let (_info, ep) = setup(&fabric);

        fabric.connect(&ep).unwrap();
        assert_eq!(fabric.poll_recv_comp(&ep).unwrap(), None);

        let mut buf = vec![0u8; 16];
        let mr = unsafe { fabric.reg_msgs(&ep, buf.as_mut_ptr(), buf.len()) }.unwrap();
        fabric.post_recv(&ep, 0, &mr).unwrap();
        let wc = fabric.poll_recv_comp(&ep).unwrap().unwrap();
        assert_eq!(wc.status(), WcStatus::WrFlushErr);
        fabric.dereg_mr(mr).unwrap();
    }

    #[test]
    fn test_recv_too_small() {
        let fabric = SimFabric::new(SimConfig::default().payload_len(64));
        let (_info, ep) = setup(&fabric);

        let mut buf = vec![0u8; 32];
        let mr = unsafe { fabric.reg_msgs(&ep, buf.as_mut_ptr(), buf.len()) }.unwrap();
        fabric.post_recv(&ep, 0, &mr).unwrap();
        fabric.connect(&ep).unwrap();
        let wc = fabric.poll_recv_comp(&ep).unwrap().unwrap();
        assert_eq!(wc.ok(), Err(WcStatus::LocLenErr));
        fabric.dereg_mr(mr).unwrap();
    }

    #[test]
    fn test_send_paths() {
        let fabric = SimFabric::new(SimConfig::default().granted_inline(8));
        let (_info, ep) = setup(&fabric);

        let mut buf = vec![7u8; 16];
        let small = [1u8; 8];

        // Not connected yet.
        assert!(unsafe { fabric.post_send(&ep, 0, &small, None, SendFlags::INLINE) }.is_err());
        fabric.connect(&ep).unwrap();

        unsafe { fabric.post_send(&ep, 1, &small, None, SendFlags::INLINE) }.unwrap();
        let wc = fabric.poll_send_comp(&ep).unwrap().unwrap();
        assert_eq!((wc.wr_id(), wc.opcode(), wc.bytes()), (1, WcOpcode::Send, 8));

        // Too large to inline, and no MR.
        assert!(unsafe { fabric.post_send(&ep, 2, &buf, None, SendFlags::INLINE) }.is_err());
        assert!(unsafe { fabric.post_send(&ep, 2, &buf, None, SendFlags::SIGNALED) }.is_err());

        let mr = unsafe { fabric.reg_msgs(&ep, buf.as_mut_ptr(), buf.len()) }.unwrap();
        unsafe { fabric.post_send(&ep, 3, &buf, Some(&mr), SendFlags::SIGNALED) }.unwrap();
        assert_eq!(fabric.poll_send_comp(&ep).unwrap().unwrap().wr_id(), 3);
        fabric.dereg_mr(mr).unwrap();
    }

    #[test]
    fn test_release_accounting() {
        let fabric = SimFabric::default();
        let (info, ep) = setup(&fabric);
        let mut buf = vec![0u8; 16];
        let mr = unsafe { fabric.reg_msgs(&ep, buf.as_mut_ptr(), buf.len()) }.unwrap();
        assert_eq!(fabric.live_resources(), 3);

        fabric.dereg_mr(mr).unwrap();
        fabric.destroy_ep(ep);
        fabric.free_addrinfo(info);
        assert_eq!(fabric.live_resources(), 0);
        assert_eq!(
            fabric.calls(),
            vec![
                Call::Resolve,
                Call::CreateEp,
                Call::RegMsgs(0),
                Call::DeregMr(0),
                Call::DestroyEp,
                Call::FreeAddrInfo,
            ]
        );
    }
}
