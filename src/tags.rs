//! Tag bitmasks
//!
//! A tag is one bit of a 32-bit mask. Clients carry the set of tags they
//! belong to, outputs carry the set they currently show. A client is visible
//! on an output when the two masks intersect.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitXor, Not};

/// Highest number of tags a mask can address
pub const MAX_TAGS: u32 = u32::BITS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagMask(u32);

impl TagMask {
    /// No tags at all. Clients with this mask are never visible.
    pub const NONE: TagMask = TagMask(0);

    /// Every tag; the "all tags" sentinel (`~0`).
    pub const ALL: TagMask = TagMask(!0);

    pub const fn from_bits(bits: u32) -> Self {
        TagMask(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Mask with only `tag` set. Indices past the mask width yield `NONE`.
    pub const fn mask_of(tag: u32) -> Self {
        if tag >= MAX_TAGS {
            TagMask::NONE
        } else {
            TagMask(1 << tag)
        }
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn is_all(self) -> bool {
        self.0 == !0
    }

    pub const fn intersects(self, other: TagMask) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn contains_tag(self, tag: u32) -> bool {
        self.intersects(TagMask::mask_of(tag))
    }

    /// Valid for an output: exactly one bit set, or all bits.
    pub const fn is_output_mask(self) -> bool {
        self.is_all() || self.0.count_ones() == 1
    }

    /// Index of the single set bit, if exactly one is set.
    pub fn single_tag(self) -> Option<u32> {
        (self.0.count_ones() == 1).then(|| self.0.trailing_zeros())
    }

    /// Tag indices set in this mask, lowest first, limited to `count` tags.
    pub fn iter_tags(self, count: u32) -> impl Iterator<Item = u32> {
        (0..count.min(MAX_TAGS)).filter(move |tag| self.contains_tag(*tag))
    }
}

/// `true` iff a client tagged `client` is visible on an output showing `output`.
pub const fn visible_on(client: TagMask, output: TagMask) -> bool {
    client.intersects(output)
}

impl BitAnd for TagMask {
    type Output = TagMask;
    fn bitand(self, rhs: TagMask) -> TagMask {
        TagMask(self.0 & rhs.0)
    }
}

impl BitOr for TagMask {
    type Output = TagMask;
    fn bitor(self, rhs: TagMask) -> TagMask {
        TagMask(self.0 | rhs.0)
    }
}

impl BitXor for TagMask {
    type Output = TagMask;
    fn bitxor(self, rhs: TagMask) -> TagMask {
        TagMask(self.0 ^ rhs.0)
    }
}

impl Not for TagMask {
    type Output = TagMask;
    fn not(self) -> TagMask {
        TagMask(!self.0)
    }
}

impl fmt::Display for TagMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_all() {
            write!(f, "all")
        } else {
            write!(f, "{:#b}", self.0)
        }
    }
}
