//! Bindings of the librdmacm and libibverbs C interfaces the client uses.

#![allow(non_snake_case)]
#![allow(non_camel_case_types)]
#![allow(non_upper_case_globals)]
#![allow(deref_nullptr)]
#![allow(clippy::missing_safety_doc)]
#![allow(clippy::too_many_arguments)]
#![allow(unused)]

mod private {
    use libc::*;
    include!(concat!(env!("OUT_DIR"), "/cm_bindings.rs"));
}

pub(crate) use self::private::*;

// The data-path verbs are `static inline` in <infiniband/verbs.h> and are not
// exported by libibverbs, so they are re-implemented over the provider ops.

/// Poll a CQ for (possibly multiple) completions.
///
/// Returns the number of completions polled, or a negative value on error.
#[inline]
pub(crate) unsafe fn ibv_poll_cq(
    cq: *mut ibv_cq,
    num_entries: ::std::os::raw::c_int,
    wc: *mut ibv_wc,
) -> ::std::os::raw::c_int {
    match (*(*cq).context).ops.poll_cq {
        Some(poll_cq) => poll_cq(cq, num_entries, wc),
        None => -libc::EOPNOTSUPP,
    }
}

/// Post a list of work requests to a send queue.
///
/// Returns 0 on success, or the error number on failure.
#[inline]
pub(crate) unsafe fn ibv_post_send(
    qp: *mut ibv_qp,
    wr: *mut ibv_send_wr,
    bad_wr: *mut *mut ibv_send_wr,
) -> ::std::os::raw::c_int {
    match (*(*qp).context).ops.post_send {
        Some(post_send) => post_send(qp, wr, bad_wr),
        None => libc::EOPNOTSUPP,
    }
}

/// Post a list of work requests to a receive queue.
///
/// Returns 0 on success, or the error number on failure.
#[inline]
pub(crate) unsafe fn ibv_post_recv(
    qp: *mut ibv_qp,
    wr: *mut ibv_recv_wr,
    bad_wr: *mut *mut ibv_recv_wr,
) -> ::std::os::raw::c_int {
    match (*(*qp).context).ops.post_recv {
        Some(post_recv) => post_recv(qp, wr, bad_wr),
        None => libc::EOPNOTSUPP,
    }
}
