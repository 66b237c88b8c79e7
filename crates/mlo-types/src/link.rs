//! Link and MLD identifiers.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An 802.11be link identifier.
///
/// The link ID is a 4-bit field in the multi-link element; value 15 is
/// reserved, so valid IDs are 0..=14. The ID doubles as the bit index of
/// per-link bitmaps such as the group quiet bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct LinkId(u8);

impl LinkId {
    /// Highest valid link ID.
    pub const MAX: u8 = 14;

    /// Number of distinct link IDs (size of a per-link bitmap).
    pub const COUNT: usize = Self::MAX as usize + 1;

    /// Creates a link ID, returning `None` for reserved values.
    pub const fn new(id: u8) -> Option<Self> {
        if id <= Self::MAX {
            Some(LinkId(id))
        } else {
            None
        }
    }

    pub const fn value(&self) -> u8 {
        self.0
    }

    /// Returns the single-bit mask of this link in a per-link bitmap.
    pub const fn bit(&self) -> u16 {
        1 << self.0
    }
}

impl TryFrom<u8> for LinkId {
    type Error = ParseError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        LinkId::new(id).ok_or(ParseError::InvalidLinkId(id))
    }
}

impl From<LinkId> for u8 {
    fn from(id: LinkId) -> u8 {
        id.0
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one multi-link device (group) context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MldId(pub u16);

impl fmt::Display for MldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mld{}", self.0)
    }
}

/// Registry key of one link session: the owning MLD plus the link ID.
///
/// Keys are plain values. Holding a key never keeps a link alive; a key
/// whose link has detached simply fails to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkKey {
    pub mld: MldId,
    pub link: LinkId,
}

impl LinkKey {
    pub const fn new(mld: MldId, link: LinkId) -> Self {
        Self { mld, link }
    }

    /// Returns the key of a sibling link in the same MLD.
    pub const fn sibling(&self, link: LinkId) -> Self {
        Self {
            mld: self.mld,
            link,
        }
    }
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/link{}", self.mld, self.link)
    }
}

impl FromStr for LinkKey {
    type Err = ParseError;

    /// Parses the `mld<N>/link<M>` form produced by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidLinkKey(s.to_string());
        let (mld, link) = s.split_once('/').ok_or_else(invalid)?;
        let mld = mld
            .strip_prefix("mld")
            .and_then(|v| v.parse::<u16>().ok())
            .ok_or_else(invalid)?;
        let link = link
            .strip_prefix("link")
            .and_then(|v| v.parse::<u8>().ok())
            .ok_or_else(invalid)?;
        Ok(LinkKey::new(MldId(mld), LinkId::try_from(link)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_link_id_range() {
        assert!(LinkId::new(0).is_some());
        assert!(LinkId::new(14).is_some());
        assert!(LinkId::new(15).is_none());
        assert_eq!(LinkId::try_from(15), Err(ParseError::InvalidLinkId(15)));
    }

    #[test]
    fn test_link_id_bit() {
        assert_eq!(LinkId::new(0).unwrap().bit(), 0b1);
        assert_eq!(LinkId::new(3).unwrap().bit(), 0b1000);
        assert_eq!(LinkId::new(14).unwrap().bit(), 0x4000);
    }

    #[test]
    fn test_link_key_display_roundtrip() {
        let key = LinkKey::new(MldId(7), LinkId::new(2).unwrap());
        assert_eq!(key.to_string(), "mld7/link2");
        assert_eq!("mld7/link2".parse::<LinkKey>().unwrap(), key);
    }

    #[test]
    fn test_link_key_invalid() {
        assert!("mld7".parse::<LinkKey>().is_err());
        assert!("mld7/link15".parse::<LinkKey>().is_err());
        assert!("x7/link1".parse::<LinkKey>().is_err());
    }

    #[test]
    fn test_sibling_keeps_mld() {
        let key = LinkKey::new(MldId(1), LinkId::new(0).unwrap());
        let sib = key.sibling(LinkId::new(1).unwrap());
        assert_eq!(sib.mld, MldId(1));
        assert_eq!(sib.link.value(), 1);
    }
}
