use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of dispatch that produced the current filter chain.
///
/// The discriminants are the bit values shared with [`DispatchMask`] and must not
/// change: code that persists dispatch types as integers relies on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum DispatcherType {
    Error = 1,
    Forward = 2,
    Include = 4,
    Request = 8,
}

impl DispatcherType {
    #[must_use]
    pub fn bits(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            1 => Some(DispatcherType::Error),
            2 => Some(DispatcherType::Forward),
            4 => Some(DispatcherType::Include),
            8 => Some(DispatcherType::Request),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DispatcherType::Error => "ERROR",
            DispatcherType::Forward => "FORWARD",
            DispatcherType::Include => "INCLUDE",
            DispatcherType::Request => "REQUEST",
        }
    }
}

impl fmt::Display for DispatcherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags::bitflags! {
    /// Set of dispatch types a filter mapping applies to.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct DispatchMask: u8 {
        const ERROR   = 0b0000_0001;
        const FORWARD = 0b0000_0010;
        const INCLUDE = 0b0000_0100;
        const REQUEST = 0b0000_1000;
    }
}

impl Default for DispatchMask {
    /// Mappings declared without dispatch types apply to plain requests only
    fn default() -> Self {
        DispatchMask::REQUEST
    }
}

impl DispatchMask {
    #[inline]
    #[must_use]
    pub fn matches(self, dispatcher_type: DispatcherType) -> bool {
        self.bits() & dispatcher_type.bits() != 0
    }
}

impl From<DispatcherType> for DispatchMask {
    fn from(t: DispatcherType) -> Self {
        DispatchMask::from_bits_truncate(t.bits())
    }
}

impl FromIterator<DispatcherType> for DispatchMask {
    fn from_iter<I: IntoIterator<Item = DispatcherType>>(iter: I) -> Self {
        iter.into_iter()
            .fold(DispatchMask::empty(), |mask, t| mask | DispatchMask::from(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_values_are_fixed() {
        assert_eq!(DispatcherType::Request.bits(), 8);
        assert_eq!(DispatcherType::Forward.bits(), 2);
        assert_eq!(DispatcherType::Include.bits(), 4);
        assert_eq!(DispatcherType::Error.bits(), 1);
        assert_eq!(DispatchMask::REQUEST.bits(), 8);
        assert_eq!(DispatcherType::from_bits(4), Some(DispatcherType::Include));
        assert_eq!(DispatcherType::from_bits(3), None);
    }

    #[test]
    fn test_mask_matching() {
        let mask: DispatchMask = [DispatcherType::Request, DispatcherType::Error]
            .into_iter()
            .collect();
        assert!(mask.matches(DispatcherType::Request));
        assert!(mask.matches(DispatcherType::Error));
        assert!(!mask.matches(DispatcherType::Include));
        assert!(DispatchMask::all().matches(DispatcherType::Forward));
        assert_eq!(DispatchMask::default(), DispatchMask::REQUEST);
    }
}
