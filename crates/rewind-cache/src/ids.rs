//! Identifier newtypes.
//!
//! Entries, documents and processes reference each other by id only. The
//! store owns entries by value; nothing holds a pointer into another
//! component.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident($inner:ty), $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub $inner);

        impl $name {
            /// Returns the raw value.
            pub const fn get(self) -> $inner {
                self.0
            }
        }

        impl From<$inner> for $name {
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

id_type!(
    /// Navigation history slot, assigned monotonically by the controller.
    NavigationEntryId(u64),
    "nav"
);

id_type!(
    /// One document/frame instance.
    DocumentId(u64),
    "doc"
);

id_type!(
    /// Backing process of one or more documents.
    ProcessId(u32),
    "proc"
);

id_type!(
    /// Navigation domain group (documents that may script each other).
    DomainGroupId(u64),
    "group"
);

id_type!(
    /// Cross-process placeholder frame.
    ProxyId(u64),
    "proxy"
);

id_type!(
    /// One in-flight restoration attempt.
    RestoreToken(u64),
    "restore"
);
