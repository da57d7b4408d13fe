use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Unique identifier for a node in the tree. Immutable for the node's lifetime.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(into = "Uuid", from = "Uuid")
)]
pub struct NodeId(pub u128);

/// Tenant scope. Sibling groups never span workspaces.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(into = "Uuid", from = "Uuid")
)]
pub struct WorkspaceId(pub u128);

macro_rules! uuid_backed_id {
    ($ty:ident) => {
        impl $ty {
            /// Fresh random (v4) identifier.
            pub fn random() -> Self {
                Self(Uuid::new_v4().as_u128())
            }

            pub fn to_bytes(self) -> [u8; 16] {
                self.0.to_be_bytes()
            }

            pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
                let arr: [u8; 16] = bytes.try_into().map_err(|_| {
                    Error::Storage(format!(
                        "expected 16-byte {}, got {} bytes",
                        stringify!($ty),
                        bytes.len()
                    ))
                })?;
                Ok(Self(u128::from_be_bytes(arr)))
            }

            /// 32 lowercase hex digits, the form embedded in encoded paths.
            pub fn to_hex(self) -> String {
                Uuid::from_u128(self.0).simple().to_string()
            }
        }

        impl From<Uuid> for $ty {
            fn from(value: Uuid) -> Self {
                Self(value.as_u128())
            }
        }

        impl From<$ty> for Uuid {
            fn from(value: $ty) -> Self {
                Uuid::from_u128(value.0)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&Uuid::from_u128(self.0), f)
            }
        }

        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Uuid::parse_str(s).map(Self::from).map_err(|e| {
                    Error::InvalidOperation(format!(
                        "malformed {} {s:?}: {e}",
                        stringify!($ty)
                    ))
                })
            }
        }
    };
}

uuid_backed_id!(NodeId);
uuid_backed_id!(WorkspaceId);

/// Opaque item classification (document, folder, block, ...). Never interpreted here.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct ItemType(pub String);

impl ItemType {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_and_display_agree_on_the_same_uuid() {
        let id = NodeId(0x0123_4567_89ab_cdef_0123_4567_89ab_cdef);
        assert_eq!(id.to_hex(), "0123456789abcdef0123456789abcdef");
        assert_eq!(id.to_string(), "01234567-89ab-cdef-0123-456789abcdef");
        assert_eq!(id.to_string().parse::<NodeId>().unwrap(), id);
        assert_eq!(id.to_hex().parse::<NodeId>().unwrap(), id);
    }

    #[test]
    fn bytes_round_trip_and_reject_wrong_width() {
        let id = WorkspaceId::random();
        assert_eq!(WorkspaceId::from_bytes(&id.to_bytes()).unwrap(), id);
        assert!(NodeId::from_bytes(&[1, 2, 3]).is_err());
    }
}
