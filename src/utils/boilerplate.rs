#![macro_use]

macro_rules! impl_cm_wrapper_traits {
    ($raw_ty:ty, $wrapper_ty:ty) => {
        impl ::std::ops::Deref for $wrapper_ty {
            type Target = ::std::ptr::NonNull<$raw_ty>;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl From<::std::ptr::NonNull<$raw_ty>> for $wrapper_ty {
            fn from(pointer: ::std::ptr::NonNull<$raw_ty>) -> Self {
                Self(pointer)
            }
        }

        impl ::std::fmt::Debug for $wrapper_ty {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_fmt(format_args!(
                    "{}<{:p}>",
                    stringify!($wrapper_ty),
                    self.0.as_ptr()
                ))
            }
        }
    };
}
