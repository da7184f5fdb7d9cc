//! Identifier newtypes

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl $name {
            /// Raw numeric value
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

id_type!(
    /// Identity of one [`crate::host::ProcessHost`]
    HostId,
    "host-"
);
id_type!(
    /// Identity of a browsing profile
    BrowserContextId,
    "ctx-"
);
id_type!(
    /// Identity of one keep-alive handle
    KeepAliveHandleId,
    "keepalive-"
);
id_type!(
    /// Identity of a navigation across its allocation attempts
    NavigationId,
    "nav-"
);

/// Monotonic id source
#[derive(Debug, Default)]
pub(crate) struct IdGenerator {
    next: u64,
}

impl IdGenerator {
    pub(crate) fn next(&mut self) -> u64 {
        self.next += 1;
        self.next
    }
}
