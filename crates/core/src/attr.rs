//! The tape attribute stored on every file that has a tape copy.

use crate::error::{Error, Result};
use crate::{MAX_COPIES, UNSET_BLOCK};
use serde::{Deserialize, Serialize};

/// Reserved attribute name within the managed filesystem's extended-attribute
/// namespace.
pub const TAPE_ATTR_NAME: &str = "coldstore.tape";

/// Type tag every serialized attribute must carry. A mismatch on read means
/// the attribute was written by something else and is treated as corrupt.
const TAPE_ATTR_TAG: u32 = 0x434f_4c44; // "COLD"

/// Fixed-shape record linking a managed file to its tape copies.
///
/// Slots beyond `copies` hold empty tape ids and [`UNSET_BLOCK`]. Only slot 0
/// is populated today; the array stays sized for future copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapeAttr {
    tag: u32,
    pub tape_ids: [String; MAX_COPIES],
    pub start_blocks: [i64; MAX_COPIES],
    pub copies: u8,
    pub in_progress: bool,
}

impl TapeAttr {
    /// Attribute for a single tape copy.
    pub fn single(tape_id: &str, start_block: i64) -> Self {
        let mut attr = Self::default();
        attr.tape_ids[0] = tape_id.to_string();
        attr.start_blocks[0] = start_block;
        attr.copies = 1;
        attr
    }

    /// Tape id and start block of the primary copy, if one is recorded.
    pub fn primary(&self) -> Option<(&str, i64)> {
        if self.copies == 0 || self.tape_ids[0].is_empty() {
            None
        } else {
            Some((self.tape_ids[0].as_str(), self.start_blocks[0]))
        }
    }

    /// Serialize for storage in the extended-attribute channel.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize and verify the type tag.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let attr: TapeAttr = serde_json::from_slice(bytes)
            .map_err(|e| Error::CorruptAttr(format!("undecodable attribute: {e}")))?;
        if attr.tag != TAPE_ATTR_TAG {
            return Err(Error::CorruptAttr(format!(
                "type tag {:#x} does not match {:#x}",
                attr.tag, TAPE_ATTR_TAG
            )));
        }
        Ok(attr)
    }
}

impl Default for TapeAttr {
    fn default() -> Self {
        Self {
            tag: TAPE_ATTR_TAG,
            tape_ids: std::array::from_fn(|_| String::new()),
            start_blocks: [UNSET_BLOCK; MAX_COPIES],
            copies: 0,
            in_progress: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attr_roundtrips() {
        let attr = TapeAttr::single("T1", 2048);
        let bytes = attr.to_bytes().unwrap();
        let back = TapeAttr::from_bytes(&bytes).unwrap();
        assert_eq!(back, attr);
        assert_eq!(back.primary(), Some(("T1", 2048)));
    }

    #[test]
    fn default_attr_has_no_primary() {
        assert_eq!(TapeAttr::default().primary(), None);
    }

    #[test]
    fn wrong_tag_is_corrupt() {
        let mut attr = TapeAttr::single("T1", 0);
        attr.tag = 0xdead_beef;
        let bytes = serde_json::to_vec(&attr).unwrap();
        let err = TapeAttr::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, Error::CorruptAttr(_)));
    }

    #[test]
    fn garbage_is_corrupt() {
        let err = TapeAttr::from_bytes(b"not an attribute").unwrap_err();
        assert!(matches!(err, Error::CorruptAttr(_)));
    }
}
