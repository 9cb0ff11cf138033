use crate::utils::{align_of_u32, align_up, size_of_u32};

// === AbiLayout === //

/// The size and alignment of a value's canonical in-memory representation.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct AbiLayout {
    pub size: u32,
    pub align: u32,
}

impl AbiLayout {
    pub const UNIT: Self = Self::new(0, 1);

    pub const fn new(size: u32, align: u32) -> Self {
        assert!(align.is_power_of_two(), "alignment must be a power of two");

        Self { size, align }
    }

    /// The layout of a `Pod` type, which agrees with its canonical layout for every primitive
    /// this crate marshals.
    pub const fn of_pod<T>() -> Self {
        Self::new(size_of_u32::<T>(), align_of_u32::<T>())
    }

    /// The smallest layout able to hold a value of either layout.
    pub const fn union(self, other: Self) -> Self {
        Self::new(
            if self.size > other.size {
                self.size
            } else {
                other.size
            },
            if self.align > other.align {
                self.align
            } else {
                other.align
            },
        )
    }

    pub const fn fits_in(self, area: Self) -> bool {
        self.size <= area.size && self.align <= area.align
    }
}

// === VariantLayout === //

/// The declared layout of a tagged variant such as `option<T>` or `result<T, E>`.
///
/// Every arm's payload sits at the same `payload_offset`, which is the tag's size rounded up to
/// the largest arm alignment. The error arm of `result<_, error>` therefore lands at offset `1`
/// while the error arm of `result<list<u8>, error>` lands at offset `4`.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct VariantLayout {
    pub tag_size: u32,
    pub payload_offset: u32,
    pub layout: AbiLayout,
}

impl VariantLayout {
    pub const fn new(arms: &[AbiLayout]) -> Self {
        let tag_size = discriminant_size(arms.len());

        let mut max_size = 0;
        let mut max_align = 1;
        let mut i = 0;

        while i < arms.len() {
            if arms[i].size > max_size {
                max_size = arms[i].size;
            }

            if arms[i].align > max_align {
                max_align = arms[i].align;
            }

            i += 1;
        }

        let payload_offset = align_up(tag_size, max_align);
        let align = if tag_size > max_align {
            tag_size
        } else {
            max_align
        };

        Self {
            tag_size,
            payload_offset,
            layout: AbiLayout::new(align_up(payload_offset + max_size, align), align),
        }
    }
}

pub const fn discriminant_size(cases: usize) -> u32 {
    if cases <= 1 << 8 {
        1
    } else if cases <= 1 << 16 {
        2
    } else {
        4
    }
}
