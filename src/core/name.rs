/*!
 * Object Names
 * Bounded diagnostic names stored inline
 */

use super::limits::OS_NAME_LENGTH;
use serde::{Deserialize, Serialize};
use smartstring::alias::String as SmartString;
use std::fmt;

/// Diagnostic name of a kernel object, truncated to `OS_NAME_LENGTH` bytes
///
/// Names up to 23 bytes are stored without a heap allocation, which covers
/// nearly every name the legacy API hands us.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ObjectName {
    inner: SmartString,
}

impl ObjectName {
    pub fn new(name: &str) -> Self {
        let mut end = name.len().min(OS_NAME_LENGTH);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        Self {
            inner: SmartString::from(&name[..end]),
        }
    }

    #[inline(always)]
    pub fn as_str(&self) -> &str {
        self.inner.as_str()
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl From<&str> for ObjectName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl AsRef<str> for ObjectName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
