use std::fmt;

use thiserror::Error;

/// Opcode of a completion queue entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WcOpcode {
    /// Send request.
    Send,
    /// RDMA write request.
    RdmaWrite,
    /// RDMA read request.
    RdmaRead,
    /// Receive request.
    Recv,
    /// Receive request with immediate data.
    RecvRdmaImm,
    /// Any opcode this client never issues (atomics, memory window binds...).
    Other(u32),
}

impl From<u32> for WcOpcode {
    /// Decode an `ibv_wc_opcode` value.
    fn from(wc_opcode: u32) -> Self {
        match wc_opcode {
            0 => WcOpcode::Send,
            1 => WcOpcode::RdmaWrite,
            2 => WcOpcode::RdmaRead,
            128 => WcOpcode::Recv,
            129 => WcOpcode::RecvRdmaImm,
            x => WcOpcode::Other(x),
        }
    }
}

/// Status of a completion queue entry.
///
/// Discriminants follow `enum ibv_wc_status`. The documentation and error
/// messages are heavily borrowed from [RDMAmojo](https://www.rdmamojo.com/2013/02/15/ibv_poll_cq/).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[repr(u32)]
pub enum WcStatus {
    /// **Operation completed successfully:** the corresponding Work Request
    /// ended and the memory buffers it refers to are ready to be (re)used.
    #[error("success")]
    Success = 0,

    /// **Local Length Error:** the posted receive buffer isn't big enough for
    /// the incoming message, or a sent message exceeds the port's maximum
    /// message size.
    #[error("local length error")]
    LocLenErr = 1,

    /// **Local QP Operation Error:** an internal QP consistency error was
    /// detected while processing this Work Request.
    #[error("local QP operation error")]
    LocQpOpErr = 2,

    /// **Local EE Context Operation Error** (**unused**, RD only).
    #[error("local EE context operation error")]
    LocEecOpErr = 3,

    /// **Local Protection Error:** the Work Request's scatter/gather list
    /// does not reference a Memory Region valid for the requested operation.
    #[error("local protection error")]
    LocProtErr = 4,

    /// **Work Request Flushed Error:** a Work Request was in process or
    /// outstanding when the QP transitioned into the Error State.
    #[error("WR flush error")]
    WrFlushErr = 5,

    /// **Memory Window Binding Error.**
    #[error("memory window bind error")]
    MwBindErr = 6,

    /// **Bad Response Error:** an unexpected transport layer opcode was
    /// returned by the responder. *Relevant for RC QPs.*
    #[error("bad response error")]
    BadRespErr = 7,

    /// **Local Access Error:** a protection error occurred on a local data
    /// buffer. *Relevant for RC QPs.*
    #[error("local access error")]
    LocAccessErr = 8,

    /// **Remote Invalid Request Error:** the responder detected an invalid
    /// message on the channel. *Relevant for RC QPs.*
    #[error("remote invalid request error")]
    RemInvReqErr = 9,

    /// **Remote Access Error:** a protection error occurred on a remote data
    /// buffer. *Relevant for RC QPs.*
    #[error("remote access error")]
    RemAccessErr = 10,

    /// **Remote Operation Error:** the operation could not be completed
    /// successfully by the responder. *Relevant for RC QPs.*
    #[error("remote operation error")]
    RemOpErr = 11,

    /// **Transport Retry Counter Exceeded:** the remote side didn't send any
    /// Ack or Nack. On the first message this usually means the remote side
    /// isn't in a state where it can respond. *Relevant for RC QPs.*
    #[error("transport retry counter exceeded")]
    RetryExcErr = 12,

    /// **RNR Retry Counter Exceeded:** the remote side didn't post any WR to
    /// its Receive Queue. *Relevant for RC QPs.*
    #[error("RNR retry counter exceeded")]
    RnrRetryExcErr = 13,

    /// **Local RDD Violation Error** (**unused**, RD only).
    #[error("local RDD violation error")]
    LocRddViolErr = 14,

    /// **Remote Invalid RD Request Error** (**unused**, RD only).
    #[error("remote invalid RD request")]
    RemInvRdReqErr = 15,

    /// **Remote Aborted Error:** the responder aborted the operation.
    #[error("remote aborted error")]
    RemAbortErr = 16,

    /// **Invalid EE Context Number** (**unused**, RD only).
    #[error("invalid EE context number")]
    InvEecnErr = 17,

    /// **Invalid EE Context State Error** (**unused**, RD only).
    #[error("invalid EE context state error")]
    InvEecStateErr = 18,

    /// **Fatal error:** a fatal error that may not be recoverable.
    #[error("fatal error")]
    FatalErr = 19,

    /// **Response Timeout Error:** a response timed out.
    #[error("response timeout error")]
    RespTimeoutErr = 20,

    /// **General Error:** other error which isn't one of the above errors.
    #[error("general error")]
    GeneralErr = 21,
}

impl From<u32> for WcStatus {
    /// Decode an `ibv_wc_status` value. Codes newer than this table (e.g.,
    /// tag-matching errors) fold into [`WcStatus::GeneralErr`].
    fn from(wc_status: u32) -> Self {
        use WcStatus::*;
        const TABLE: [WcStatus; 22] = [
            Success,
            LocLenErr,
            LocQpOpErr,
            LocEecOpErr,
            LocProtErr,
            WrFlushErr,
            MwBindErr,
            BadRespErr,
            LocAccessErr,
            RemInvReqErr,
            RemAccessErr,
            RemOpErr,
            RetryExcErr,
            RnrRetryExcErr,
            LocRddViolErr,
            RemInvRdReqErr,
            RemAbortErr,
            InvEecnErr,
            InvEecStateErr,
            FatalErr,
            RespTimeoutErr,
            GeneralErr,
        ];
        TABLE
            .get(wc_status as usize)
            .copied()
            .unwrap_or(GeneralErr)
    }
}

/// Work completion entry.
///
/// A backend-neutral copy of the fields of `ibv_wc` this client consumes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Wc {
    wr_id: u64,
    opcode: WcOpcode,
    status: WcStatus,
    byte_len: u32,
}

impl Wc {
    /// Assemble a work completion.
    pub fn new(wr_id: u64, opcode: WcOpcode, status: WcStatus, byte_len: u32) -> Self {
        Self {
            wr_id,
            opcode,
            status,
            byte_len,
        }
    }

    /// Get the work request ID.
    #[inline]
    pub fn wr_id(&self) -> u64 {
        self.wr_id
    }

    /// Get the completion status.
    #[inline]
    pub fn status(&self) -> WcStatus {
        self.status
    }

    /// Get the completion status as a `Result`.
    ///
    /// - If the status is `Success`, return the number of bytes processed or transferred.
    /// - Otherwise, return an error.
    #[inline]
    pub fn ok(&self) -> Result<usize, WcStatus> {
        match self.status {
            WcStatus::Success => Ok(self.bytes()),
            status => Err(status),
        }
    }

    /// Get the opcode of the work request.
    #[inline]
    pub fn opcode(&self) -> WcOpcode {
        self.opcode
    }

    /// Get the number of bytes processed or transferred.
    #[inline]
    pub fn bytes(&self) -> usize {
        self.byte_len as usize
    }
}

impl fmt::Debug for Wc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wc")
            .field("wr_id", &self.wr_id)
            .field("opcode", &self.opcode)
            .field("status", &self.status)
            .field("bytes", &self.byte_len)
            .finish()
    }
}
