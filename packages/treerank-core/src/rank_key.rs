//! Key space: variable-length base-62 fractional keys compared byte-wise.
//!
//! A key is an *integer part* followed by an optional *fractional part*. The integer part is a
//! head character that fixes how many digits follow it (`a`..`z` for 1..26 digits on the
//! positive side, `Z`..`A` for 1..26 digits on the negative side). The fractional part never
//! ends in `0`, which guarantees there is always room below any key.

use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub(crate) const DIGITS: &[u8; 62] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
pub(crate) const BASE: u8 = 62;

/// Key handed out when a sibling group is empty.
pub const DEFAULT_KEY: &str = "a0";

/// `A` followed by 26 zeros. Has no key below it, so it is never a valid key on its own.
pub(crate) const SMALLEST_INTEGER: &str = "A00000000000000000000000000";

/// Sortable rank of a node among its siblings.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "String", into = "String")
)]
pub struct RankKey(String);

impl RankKey {
    pub fn parse(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        validate(&key)?;
        Ok(Self(key))
    }

    pub fn default_key() -> Self {
        Self(DEFAULT_KEY.to_string())
    }

    pub(crate) fn from_validated(key: String) -> Self {
        debug_assert!(validate(&key).is_ok(), "generated invalid key {key:?}");
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `(integer part, fractional part)`.
    pub fn split(&self) -> (&str, &str) {
        // Validated keys always carry a complete integer part.
        let n = integer_len(self.0.as_bytes()[0]).unwrap_or(self.0.len());
        self.0.split_at(n)
    }
}

impl fmt::Display for RankKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RankKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RankKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<RankKey> for String {
    fn from(value: RankKey) -> Self {
        value.0
    }
}

impl AsRef<str> for RankKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn invalid(key: &str, reason: &'static str) -> Error {
    Error::InvalidKey {
        key: key.to_string(),
        reason,
    }
}

fn validate(key: &str) -> Result<()> {
    let bytes = key.as_bytes();
    let Some(&head) = bytes.first() else {
        return Err(invalid(key, "empty key"));
    };
    if bytes.iter().any(|b| digit_value(*b).is_none()) {
        return Err(invalid(key, "character outside the base-62 alphabet"));
    }
    let int_len = integer_len(head).ok_or_else(|| invalid(key, "unknown integer head"))?;
    if bytes.len() < int_len {
        return Err(invalid(key, "truncated integer part"));
    }
    if key == SMALLEST_INTEGER {
        return Err(invalid(key, "smallest integer has no key below it"));
    }
    if bytes.len() > int_len && bytes.last() == Some(&b'0') {
        return Err(invalid(key, "fractional part ends in 0"));
    }
    Ok(())
}

pub(crate) fn digit_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'Z' => Some(b - b'A' + 10),
        b'a'..=b'z' => Some(b - b'a' + 36),
        _ => None,
    }
}

/// Total length (head included) of an integer part starting with `head`.
pub(crate) fn integer_len(head: u8) -> Option<usize> {
    match head {
        b'a'..=b'z' => Some((head - b'a') as usize + 2),
        b'A'..=b'Z' => Some((b'Z' - head) as usize + 2),
        _ => None,
    }
}

fn join(head: u8, digits: Vec<u8>) -> String {
    let mut out = Vec::with_capacity(digits.len() + 1);
    out.push(head);
    out.extend(digits);
    // Every byte comes from DIGITS or is an ASCII head.
    String::from_utf8(out).unwrap_or_default()
}

/// Next integer part, or `None` past the largest representable one.
pub(crate) fn increment_integer(int: &str) -> Option<String> {
    let (&head, rest) = int.as_bytes().split_first()?;
    let mut digits = rest.to_vec();
    let mut carry = true;
    for d in digits.iter_mut().rev() {
        let v = digit_value(*d)? + 1;
        if v == BASE {
            *d = DIGITS[0];
        } else {
            *d = DIGITS[v as usize];
            carry = false;
            break;
        }
    }
    if !carry {
        return Some(join(head, digits));
    }
    match head {
        b'Z' => Some(join(b'a', vec![DIGITS[0]])),
        b'z' => None,
        _ => {
            let h = head + 1;
            if h > b'a' {
                digits.push(DIGITS[0]);
            } else {
                digits.pop();
            }
            Some(join(h, digits))
        }
    }
}

/// Previous integer part, or `None` below the smallest representable one.
pub(crate) fn decrement_integer(int: &str) -> Option<String> {
    let (&head, rest) = int.as_bytes().split_first()?;
    let top = DIGITS[(BASE - 1) as usize];
    let mut digits = rest.to_vec();
    let mut borrow = true;
    for d in digits.iter_mut().rev() {
        let v = digit_value(*d)?;
        if v == 0 {
            *d = top;
        } else {
            *d = DIGITS[(v - 1) as usize];
            borrow = false;
            break;
        }
    }
    if !borrow {
        return Some(join(head, digits));
    }
    match head {
        b'a' => Some(join(b'Z', vec![top])),
        b'A' => None,
        _ => {
            let h = head - 1;
            if h < b'Z' {
                digits.push(top);
            } else {
                digits.pop();
            }
            Some(join(h, digits))
        }
    }
}
