/// Provide interoperability with C return values.
pub(crate) mod interop;

/// Wrapper-type boilerplate for raw `librdmacm` handles.
#[cfg(feature = "rdmacm")]
pub(crate) mod boilerplate;
