use std::fmt;
use std::ops::BitOr;

use thiserror::Error;

/// Endpoint (queue pair) capability attributes.
///
/// Documentation heavily borrowed from [RDMAmojo](https://www.rdmamojo.com/2012/12/21/ibv_create_qp/).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EpCaps {
    /// The maximum number of outstanding work Requests that can be posted to
    /// the Send Queue.
    pub max_send_wr: u32,

    /// The maximum number of outstanding Work Requests that can be posted to
    /// the Receive Queue.
    pub max_recv_wr: u32,

    /// The maximum number of scatter/gather elements in any Work Request that
    /// can be posted to the Send Queue.
    pub max_send_sge: u32,

    /// The maximum number of scatter/gather elements in any Work Request that
    /// can be posted to the Receive Queue.
    pub max_recv_sge: u32,

    /// The maximum message size (in bytes) that can be posted inline to the
    /// Send Queue. If no inline message is requested, the value can be 0.
    ///
    /// On return from endpoint creation this holds what the device actually
    /// granted, which may differ from the request.
    pub max_inline_data: u32,
}

impl EpCaps {
    /// Inline threshold requested when nothing else is configured.
    pub const DEFAULT_INLINE_DATA: u32 = 160;

    /// Capabilities for a single-shot transfer: one outstanding send and one
    /// outstanding receive, each with a single SGE, plus the given inline
    /// threshold.
    pub fn single_shot(max_inline_data: u32) -> Self {
        EpCaps {
            max_send_wr: 1,
            max_recv_wr: 1,
            max_send_sge: 1,
            max_recv_sge: 1,
            max_inline_data,
        }
    }

    /// Whether a message of `len` bytes fits in the inline threshold.
    #[inline]
    pub fn supports_inline(&self, len: usize) -> bool {
        self.max_inline_data as usize >= len
    }

    /// Check these (requested) capabilities against device limits.
    pub fn check(&self, limits: &EpCaps) -> Result<(), CapsError> {
        let pairs = [
            ("max_send_wr", limits.max_send_wr, self.max_send_wr),
            ("max_recv_wr", limits.max_recv_wr, self.max_recv_wr),
            ("max_send_sge", limits.max_send_sge, self.max_send_sge),
            ("max_recv_sge", limits.max_recv_sge, self.max_recv_sge),
        ];
        for (name, max, required) in pairs {
            if required > max {
                return Err(CapsError::CapabilityNotEnough(name.to_string(), max, required));
            }
        }
        Ok(())
    }
}

/// Capability negotiation error.
#[derive(Debug, Error)]
pub enum CapsError {
    /// Specified capabilities are not supported by the device.
    /// The three fields are for the capability name, the maximum supported
    /// value, and the required value.
    #[error("capability not enough: {0} supports up to {1}, {2} required")]
    CapabilityNotEnough(String, u32, u32),
}

/// Send work request flags. Bit values follow `enum ibv_send_flags`.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct SendFlags(u32);

impl SendFlags {
    pub const EMPTY: Self = Self(0);
    pub const SIGNALED: Self = Self(1 << 1);
    pub const INLINE: Self = Self(1 << 3);

    /// Raw flag bits.
    #[inline]
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Whether every flag in `other` is set.
    #[inline]
    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for SendFlags {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for SendFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::SIGNALED, "SIGNALED"),
            (Self::INLINE, "INLINE"),
        ];
        let mut set = f.debug_set();
        for (flag, name) in names {
            if self.contains(flag) {
                set.entry(&format_args!("{}", name));
            }
        }
        set.finish()
    }
}

impl BitOr for SendFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_caps() {
        let limits = EpCaps {
            max_send_wr: 16,
            max_recv_wr: 16,
            max_send_sge: 4,
            max_recv_sge: 4,
            max_inline_data: 0,
        };
        assert!(EpCaps::single_shot(160).check(&limits).is_ok());

        let caps = EpCaps {
            max_recv_sge: 8,
            ..EpCaps::single_shot(0)
        };
        let err = caps.check(&limits).unwrap_err();
        assert_eq!(
            err.to_string(),
            "capability not enough: max_recv_sge supports up to 4, 8 required"
        );
    }

    #[test]
    fn test_inline_threshold() {
        let caps = EpCaps::single_shot(160);
        assert!(caps.supports_inline(160));
        assert!(!caps.supports_inline(161));
        assert!(!caps.supports_inline(1 << 30));
    }

    #[test]
    fn test_send_flags() {
        let flags = SendFlags::SIGNALED | SendFlags::INLINE;
        assert_eq!(flags.bits(), 0b1010);
        assert!(flags.contains(SendFlags::INLINE));
        assert!(!SendFlags::SIGNALED.contains(flags));
        assert_eq!(format!("{:?}", flags), "{SIGNALED, INLINE}");
        assert_eq!(SendFlags::default(), SendFlags::EMPTY);
    }
}
