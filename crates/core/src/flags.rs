//! Flag-set newtypes
//!
//! The runtime vocabulary is full of bitmask flags that other code extends.
//! `flag_set!` declares a transparent newtype over an integer with named
//! constants and the usual set operations, keeping the underlying bits open.

/// Declare a flag-set newtype with named constants.
///
/// ```
/// nirva_core::flag_set! {
///     /// Example flags
///     pub struct Example: u32 {
///         /// First bit
///         const A = 1 << 0;
///         /// Second bit
///         const B = 1 << 1;
///     }
/// }
/// let f = Example::A | Example::B;
/// assert!(f.contains(Example::A));
/// ```
#[macro_export]
macro_rules! flag_set {
    (
        $(#[$outer:meta])*
        pub struct $name:ident: $repr:ty {
            $(
                $(#[$inner:meta])*
                const $flag:ident = $value:expr;
            )*
        }
    ) => {
        $(#[$outer])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub $repr);

        #[allow(missing_docs)]
        impl $name {
            $(
                $(#[$inner])*
                pub const $flag: $name = $name($value);
            )*

            /// The empty set
            pub const fn empty() -> Self {
                $name(0)
            }

            /// Raw bits
            pub const fn bits(self) -> $repr {
                self.0
            }

            /// Build from raw bits (unknown bits are kept)
            pub const fn from_bits(bits: $repr) -> Self {
                $name(bits)
            }

            /// True if every bit of `other` is set
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            /// True if any bit of `other` is set
            pub const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            /// True if no bits are set
            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            /// Set the bits of `other`
            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            /// Clear the bits of `other`
            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }

            /// Set or clear the bits of `other`
            pub fn set(&mut self, other: Self, on: bool) {
                if on {
                    self.insert(other)
                } else {
                    self.remove(other)
                }
            }

            /// Names of the known flags that are set
            pub fn names(self) -> Vec<&'static str> {
                let mut out = Vec::new();
                $(
                    if Self::$flag.0 != 0 && self.contains(Self::$flag) {
                        out.push(stringify!($flag));
                    }
                )*
                out
            }
        }

        impl std::ops::BitOr for $name {
            type Output = $name;
            fn bitor(self, rhs: $name) -> $name {
                $name(self.0 | rhs.0)
            }
        }

        impl std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: $name) {
                self.0 |= rhs.0;
            }
        }

        impl std::ops::BitAnd for $name {
            type Output = $name;
            fn bitand(self, rhs: $name) -> $name {
                $name(self.0 & rhs.0)
            }
        }

        impl std::ops::Not for $name {
            type Output = $name;
            fn not(self) -> $name {
                $name(!self.0)
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({:#x} {:?})", stringify!($name), self.0, self.names())
            }
        }
    };
}
