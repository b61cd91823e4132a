/// Define an enumeration with known variants and an unknown representation.
///
/// Protocol number registries are open ended. This keeps unknown values around so that a parsed
/// header can be inspected and re-emitted without loss.
// Copyright (C) 2016 whitequark@whitequark.org
macro_rules! enum_with_unknown {
    (
        $( #[$enum_attr:meta] )*
        pub enum $name:ident($ty:ty) {
            $(
              $( #[$variant_attr:meta] )*
              $variant:ident = $value:expr
            ),+ $(,)*
        }
    ) => {
        #[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
        $( #[$enum_attr] )*
        pub enum $name {
            $(
              $( #[$variant_attr] )*
              $variant
            ),*,
            /// A value whose interpretation was not determined.
            Unknown($ty)
        }

        impl ::core::convert::From<$ty> for $name {
            fn from(value: $ty) -> Self {
                match value {
                    $( $value => $name::$variant ),*,
                    other => $name::Unknown(other)
                }
            }
        }

        impl ::core::convert::From<$name> for $ty {
            fn from(value: $name) -> Self {
                match value {
                    $( $name::$variant => $value ),*,
                    $name::Unknown(other) => other
                }
            }
        }
    }
}

/// Declare a dynamically sized byte wrapper.
///
/// Defines a `#[repr(transparent)]` type around `[u8]` and two private conversions from byte
/// slices, `__from_macro_new_unchecked` and `__from_macro_new_unchecked_mut`. Header types
/// build their checked constructors on top of these.
macro_rules! byte_wrapper {
    (
        $( #[$attr:meta] )*
        pub struct $name:ident([u8])$(;)*
    ) => {
        #[allow(non_camel_case_types)]
        #[repr(transparent)]
        $( #[$attr] )*
        pub struct $name([u8]);

        impl $name {
            #[allow(dead_code)]
            fn __from_macro_new_unchecked(data: &[u8]) -> &Self {
                // SAFETY: this is safe due to repr(transparent)
                unsafe { &*(data as *const _ as *const Self) }
            }

            #[allow(dead_code)]
            fn __from_macro_new_unchecked_mut(data: &mut [u8]) -> &mut Self {
                // SAFETY: this is safe due to repr(transparent)
                unsafe { &mut *(data as *mut _ as *mut Self) }
            }
        }
    }
}

#[cfg(feature = "log")]
#[macro_use]
mod logging {
    macro_rules! net_log {
        (trace, $($arg:expr),*) => { ::log::trace!($($arg),*); };
        (debug, $($arg:expr),*) => { ::log::debug!($($arg),*); };
        (warn, $($arg:expr),*) => { ::log::warn!($($arg),*); };
    }
}

#[cfg(not(feature = "log"))]
#[macro_use]
mod logging {
    macro_rules! net_log {
        ($level:ident, $($arg:expr),*) => { $( let _ = &$arg; )* }
    }
}

macro_rules! net_trace {
    ($($arg:expr),*) => (net_log!(trace, $($arg),*));
}

macro_rules! net_debug {
    ($($arg:expr),*) => (net_log!(debug, $($arg),*));
}

macro_rules! net_warn {
    ($($arg:expr),*) => (net_log!(warn, $($arg),*));
}
