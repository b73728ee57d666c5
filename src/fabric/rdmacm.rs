//! `librdmacm`-backed fabric.
//!
//! The endpoint is created with `rdma_create_ep` in synchronous mode (no event
//! channel), so `rdma_connect` blocks until the handshake finishes, and the
//! CM id carries its own PD, QP and send/recv CQs.

use std::ffi::CString;
use std::io;
use std::ptr::{self, NonNull};

use super::*;
use crate::bindings::*;
use crate::utils::interop::*;

/// Access flags of message buffers: local write only, as `rdma_reg_msgs` does.
const MSG_ACCESS: ibv_access_flags = ibv_access_flags::IBV_ACCESS_LOCAL_WRITE;

pub(crate) struct RdmaAddrInfo(NonNull<rdma_addrinfo>);
impl_cm_wrapper_traits!(rdma_addrinfo, RdmaAddrInfo);

pub(crate) struct RdmaCmId(NonNull<rdma_cm_id>);
impl_cm_wrapper_traits!(rdma_cm_id, RdmaCmId);

pub(crate) struct IbvMr(NonNull<ibv_mr>);
impl_cm_wrapper_traits!(ibv_mr, IbvMr);

/// Resolved address of the server.
#[derive(Debug)]
pub struct CmAddrInfo(RdmaAddrInfo);

/// A CM id with its queue pair and completion queues.
#[derive(Debug)]
pub struct CmEndpoint {
    id: RdmaCmId,
    caps: EpCaps,
}

impl CmEndpoint {
    /// Granted capabilities.
    pub fn caps(&self) -> &EpCaps {
        &self.caps
    }

    fn qp(&self) -> *mut ibv_qp {
        // SAFETY: the CM id is valid until `destroy_ep` consumes it.
        unsafe { (*self.id.as_ptr()).qp }
    }

    fn send_cq(&self) -> *mut ibv_cq {
        // SAFETY: as above.
        unsafe { (*self.id.as_ptr()).send_cq }
    }

    fn recv_cq(&self) -> *mut ibv_cq {
        // SAFETY: as above.
        unsafe { (*self.id.as_ptr()).recv_cq }
    }
}

/// A memory region registered on an endpoint's protection domain.
#[derive(Debug)]
pub struct CmMr(IbvMr);

impl CmMr {
    /// Start address of the registered memory.
    pub fn addr(&self) -> *mut u8 {
        // SAFETY: the `ibv_mr` is valid until `dereg_mr` consumes it.
        unsafe { (*self.0.as_ptr()).addr as *mut u8 }
    }

    /// Length of the registered memory.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        // SAFETY: as above.
        unsafe { (*self.0.as_ptr()).length }
    }

    /// Local key.
    pub fn lkey(&self) -> u32 {
        // SAFETY: as above.
        unsafe { (*self.0.as_ptr()).lkey }
    }
}

/// The RDMA connection manager of the local host.
#[derive(Debug, Default, Clone, Copy)]
pub struct CmFabric;

impl CmFabric {
    pub fn new() -> Self {
        CmFabric
    }
}

fn poll_one(cq: *mut ibv_cq) -> io::Result<Option<Wc>> {
    let mut wc = ibv_wc::default();

    // SAFETY: FFI; `cq` belongs to a live CM id.
    let num = unsafe { ibv_poll_cq(cq, 1, &mut wc) };
    if num < 0 {
        return Err(io::Error::from_raw_os_error(-num));
    }
    if num == 0 {
        return Ok(None);
    }
    Ok(Some(Wc::new(
        wc.wr_id,
        WcOpcode::from(wc.opcode),
        WcStatus::from(wc.status),
        wc.byte_len,
    )))
}

impl Fabric for CmFabric {
    type AddrInfo = CmAddrInfo;
    type Endpoint = CmEndpoint;
    type Mr = CmMr;

    fn resolve(&self, host: &str, port: &str) -> Result<CmAddrInfo, ResolveError> {
        let bad_name = |_| ResolveError {
            code: libc::EAI_NONAME,
            reason: gai_reason(libc::EAI_NONAME),
        };
        let node = CString::new(host).map_err(bad_name)?;
        let service = CString::new(port).map_err(bad_name)?;

        let hints = rdma_addrinfo {
            ai_port_space: rdma_port_space::RDMA_PS_TCP as _,
            ..Default::default()
        };
        let mut res = ptr::null_mut();

        // SAFETY: FFI; all pointers are valid for the duration of the call.
        let ret = unsafe { rdma_getaddrinfo(node.as_ptr(), service.as_ptr(), &hints, &mut res) };
        if ret != 0 {
            return Err(ResolveError {
                code: ret,
                reason: gai_reason(ret),
            });
        }
        NonNull::new(res)
            .map(|res| CmAddrInfo(RdmaAddrInfo(res)))
            .ok_or_else(|| ResolveError {
                code: libc::EAI_FAIL,
                reason: gai_reason(libc::EAI_FAIL),
            })
    }

    fn create_ep(&self, info: &CmAddrInfo, caps: EpCaps) -> io::Result<(CmEndpoint, EpCaps)> {
        let mut attr = ibv_qp_init_attr::default();
        attr.cap.max_send_wr = caps.max_send_wr;
        attr.cap.max_recv_wr = caps.max_recv_wr;
        attr.cap.max_send_sge = caps.max_send_sge;
        attr.cap.max_recv_sge = caps.max_recv_sge;
        attr.cap.max_inline_data = caps.max_inline_data;
        attr.sq_sig_all = 1;

        let mut id = ptr::null_mut();

        // SAFETY: FFI; a NULL PD makes the CM id allocate its own.
        let ret = unsafe { rdma_create_ep(&mut id, info.0.as_ptr(), ptr::null_mut(), &mut attr) };
        from_c_ret(ret)?;
        let id = NonNull::new(id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "rdma_create_ep returned no id"))?;

        // `rdma_create_ep` writes back what the device actually granted.
        let granted = EpCaps {
            max_send_wr: attr.cap.max_send_wr,
            max_recv_wr: attr.cap.max_recv_wr,
            max_send_sge: attr.cap.max_send_sge,
            max_recv_sge: attr.cap.max_recv_sge,
            max_inline_data: attr.cap.max_inline_data,
        };
        let ep = CmEndpoint {
            id: RdmaCmId(id),
            caps: granted,
        };
        Ok((ep, granted))
    }

    unsafe fn reg_msgs(&self, ep: &CmEndpoint, addr: *mut u8, len: usize) -> io::Result<CmMr> {
        let pd = (*ep.id.as_ptr()).pd;

        // SAFETY: FFI; the caller guarantees the memory region is valid.
        let mr = ibv_reg_mr(pd, addr as *mut _, len, MSG_ACCESS.0 as i32);
        NonNull::new(mr)
            .map(|mr| CmMr(IbvMr(mr)))
            .ok_or_else(io::Error::last_os_error)
    }

    fn post_recv(&self, ep: &CmEndpoint, wr_id: u64, mr: &CmMr) -> io::Result<()> {
        let mut sge = ibv_sge {
            addr: mr.addr() as u64,
            length: mr.len() as u32,
            lkey: mr.lkey(),
        };
        let mut wr = ibv_recv_wr {
            wr_id,
            next: ptr::null_mut(),
            sg_list: &mut sge,
            num_sge: 1,
        };
        let mut bad_wr = ptr::null_mut();

        // SAFETY: FFI; the work request only lives during this call, and the
        // memory it references is registered.
        let ret = unsafe { ibv_post_recv(ep.qp(), &mut wr, &mut bad_wr) };
        from_c_errno_explained(ret, recv_err_explanation)
    }

    unsafe fn post_send(
        &self,
        ep: &CmEndpoint,
        wr_id: u64,
        buf: &[u8],
        mr: Option<&CmMr>,
        flags: SendFlags,
    ) -> io::Result<()> {
        let mut sge = ibv_sge {
            addr: buf.as_ptr() as u64,
            length: buf.len() as u32,
            lkey: mr.map_or(0, CmMr::lkey),
        };
        let mut wr = ibv_send_wr {
            wr_id,
            next: ptr::null_mut(),
            sg_list: &mut sge,
            num_sge: 1,
            opcode: ibv_wr_opcode::IBV_WR_SEND,
            send_flags: flags.bits(),
            ..Default::default()
        };
        let mut bad_wr = ptr::null_mut();

        // SAFETY: FFI; the caller keeps `buf` alive until completion.
        let ret = ibv_post_send(ep.qp(), &mut wr, &mut bad_wr);
        from_c_errno_explained(ret, send_err_explanation)
    }

    fn connect(&self, ep: &CmEndpoint) -> io::Result<()> {
        // SAFETY: FFI; no private data is sent.
        let ret = unsafe { rdma_connect(ep.id.as_ptr(), ptr::null_mut()) };
        from_c_ret(ret)
    }

    fn poll_recv_comp(&self, ep: &CmEndpoint) -> io::Result<Option<Wc>> {
        poll_one(ep.recv_cq())
    }

    fn poll_send_comp(&self, ep: &CmEndpoint) -> io::Result<Option<Wc>> {
        poll_one(ep.send_cq())
    }

    fn disconnect(&self, ep: &CmEndpoint) -> io::Result<()> {
        // SAFETY: FFI.
        let ret = unsafe { rdma_disconnect(ep.id.as_ptr()) };
        from_c_ret(ret)
    }

    fn dereg_mr(&self, mr: CmMr) -> io::Result<()> {
        // SAFETY: FFI; `mr` is consumed so it cannot be deregistered twice.
        let ret = unsafe { ibv_dereg_mr(mr.0.as_ptr()) };
        from_c_errno(ret)
    }

    fn destroy_ep(&self, ep: CmEndpoint) {
        // SAFETY: FFI; `ep` is consumed so it cannot be destroyed twice.
        unsafe { rdma_destroy_ep(ep.id.as_ptr()) };
    }

    fn free_addrinfo(&self, info: CmAddrInfo) {
        // SAFETY: FFI; `info` is consumed so it cannot be freed twice.
        unsafe { rdma_freeaddrinfo(info.0.as_ptr()) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_msg_access() {
        // `IBV_ACCESS_LOCAL_WRITE` is bit 0; no remote access is granted.
        assert_eq!(MSG_ACCESS.0, 1);
        assert_eq!(MSG_ACCESS.0 & !1, 0);
    }

    #[test]
    fn test_resolve_unknown_host() {
        let fabric = CmFabric::new();
        let err = fabric.resolve("no-such-host.invalid", "7471").unwrap_err();
        assert_ne!(err.code, 0);
        assert!(!err.reason.is_empty());
    }

    #[test]
    #[ignore = "needs an RDMA device and a server on 127.0.0.1:7471"]
    fn test_run_against_server() {
        let cfg = crate::config::ClientConfig {
            msg_size: 1 << 20,
            ..Default::default()
        };
        let report = crate::client::run(&CmFabric::new(), &cfg).unwrap();
        assert!(report.all_same());
    }
}
