use std::ffi::CStr;
use std::io;

/// Converts a `librdmacm`-style C return value to a Rust `Result`.
///
/// `librdmacm` reports failures by returning `-1` and setting `errno`.
#[inline(always)]
#[cfg_attr(not(feature = "rdmacm"), allow(dead_code))]
pub(crate) fn from_c_ret(ret: i32) -> io::Result<()> {
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Converts a verbs-style C return value, which is the error number itself,
/// to a Rust `Result`.
#[inline(always)]
#[cfg_attr(not(feature = "rdmacm"), allow(dead_code))]
pub(crate) fn from_c_errno(ret: i32) -> io::Result<()> {
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(ret.abs()))
    }
}

/// Like [`from_c_errno`], but replaces the OS message with a more specific
/// explanation when `f` knows one.
#[inline(always)]
pub(crate) fn from_c_errno_explained(
    ret: i32,
    f: impl FnOnce(i32) -> Option<&'static str>,
) -> io::Result<()> {
    if ret == 0 {
        return Ok(());
    }
    let ret = ret.abs();
    let kind = io::Error::from_raw_os_error(ret).kind();
    match f(ret) {
        Some(msg) => Err(io::Error::new(kind, msg)),
        None => Err(io::Error::from_raw_os_error(ret)),
    }
}

/// Get the human-readable text of a `getaddrinfo`-family error code.
pub(crate) fn gai_reason(code: i32) -> String {
    // SAFETY: FFI; `gai_strerror` returns a pointer to a static string.
    let msg = unsafe { libc::gai_strerror(code) };
    if msg.is_null() {
        return format!("unknown resolver error {}", code);
    }
    // SAFETY: non-null, NUL-terminated static string.
    unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
}

/// Explain `ibv_post_recv` errors.
pub(crate) fn recv_err_explanation(ret: i32) -> Option<&'static str> {
    match ret {
        libc::EINVAL => Some("invalid work request"),
        libc::ENOMEM => {
            Some("recv queue is full, or not enough resources to complete this operation")
        }
        libc::EFAULT => Some("invalid QP"),
        _ => None,
    }
}

/// Explain `ibv_post_send` errors.
pub(crate) fn send_err_explanation(ret: i32) -> Option<&'static str> {
    match ret {
        libc::EINVAL => Some("invalid work request"),
        libc::ENOMEM => {
            Some("send queue is full, or not enough resources to complete this operation")
        }
        libc::EFAULT => Some("invalid QP"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_passthrough() {
        assert!(from_c_errno(0).is_ok());
        let err = from_c_errno(libc::ECONNREFUSED).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ECONNREFUSED));

        // Some providers return the negated error number.
        let err = from_c_errno(-libc::ETIMEDOUT).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ETIMEDOUT));
    }

    #[test]
    fn test_gai_reason() {
        assert!(!gai_reason(libc::EAI_NONAME).is_empty());
        assert_ne!(gai_reason(libc::EAI_NONAME), gai_reason(libc::EAI_SERVICE));
    }

    #[test]
    fn test_explained() {
        let err = from_c_errno_explained(libc::ENOMEM, recv_err_explanation).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::OutOfMemory);
        assert!(err.to_string().starts_with("recv queue is full"));

        let err = from_c_errno_explained(libc::EFAULT, send_err_explanation).unwrap_err();
        assert_eq!(err.to_string(), "invalid QP");

        // Unknown codes keep the OS text.
        let err = from_c_errno_explained(libc::EIO, send_err_explanation).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EIO));
    }
}
