//! Stats and state views over engine buffers.
//!
//! Every endpoint, session and stream owns one stats view and one state
//! view. Views read the engine's shared buffer while the entity is alive and
//! switch to a frozen copy when it finalizes, so values stay readable after
//! close.

mod buffer;
mod endpoint;
mod session;
mod stream;

pub use buffer::{BufferView, SharedBuffer};
pub use endpoint::{EndpointState, EndpointStats};
pub use session::{SessionState, SessionStats};
pub use stream::{StreamState, StreamStats};

/// Declares a read-only counter view with one accessor per slot.
///
/// Counters serialize as decimal strings so 64-bit values survive JSON
/// consumers that parse numbers as doubles.
macro_rules! stats_view {
    (
        $(#[$meta:meta])*
        pub struct $name:ident : $layout:ident {
            $(
                $(#[$field_meta:meta])*
                $field:ident = $index:ident => $json:literal,
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name {
            view: std::sync::Arc<$crate::stats::BufferView>,
        }

        impl $name {
            pub(crate) fn new(buffer: $crate::stats::SharedBuffer) -> Self {
                Self {
                    view: std::sync::Arc::new($crate::stats::BufferView::live(buffer)),
                }
            }

            $(
                $(#[$field_meta])*
                pub fn $field(&self) -> u64 {
                    self.view.get($crate::core::constants::$layout::$index)
                }
            )*

            /// Whether the values are frozen.
            pub fn is_snapshot(&self) -> bool {
                self.view.is_snapshot()
            }

            /// Raw little-endian bytes of the whole buffer.
            pub fn to_bytes(&self) -> Vec<u8> {
                self.view.to_bytes()
            }

            pub(crate) fn snapshot(&self) {
                self.view.snapshot();
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                use serde::ser::SerializeStruct;

                let fields = [$($json),*];
                let mut state = serializer.serialize_struct(stringify!($name), fields.len())?;
                $(
                    state.serialize_field($json, &self.$field().to_string())?;
                )*
                state.end()
            }
        }
    };
}

pub(crate) use stats_view;
