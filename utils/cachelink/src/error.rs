use crate::AbiLayout;

/// A value crossing the boundary did not follow the canonical ABI.
///
/// These are never recovered from by picking a default arm; they travel inside an
/// [`anyhow::Error`] and can be recovered with [`anyhow::Error::downcast_ref`].
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("malformed {ty} tag {tag}")]
    MalformedTag { ty: &'static str, tag: u8 },

    #[error("boolean was neither `0` nor `1` (got {0})")]
    InvalidBool(u8),

    #[error("option flag was neither `0` nor `1` (got {0})")]
    InvalidOptionFlag(u32),

    #[error("unknown {ty} discriminant {value}")]
    UnknownDiscriminant { ty: &'static str, value: u64 },

    #[error("address {base:#x} offset by {offset} byte(s) overflows the address space")]
    AddressOverflow { base: u32, offset: u32 },

    #[error("invalid UTF-8 sequence")]
    InvalidUtf8,

    #[error("a value of layout {needed:?} does not fit in a return area of layout {area:?}")]
    ReturnAreaTooSmall { needed: AbiLayout, area: AbiLayout },
}
