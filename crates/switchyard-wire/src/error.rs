//! Error surface of the frame codec.

use thiserror::Error;

/// Failures raised while encoding or decoding a frame.
///
/// Every decode variant is a framing error: the byte stream can no longer be
/// trusted and the owning connection must be closed. Running out of bytes is
/// never reported here; decoders return `Ok(None)` instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// The first four bytes matched neither accepted magic literal.
    #[error("bad frame magic {found:02x?}")]
    BadMagic {
        /// The bytes found where the magic was expected.
        found: [u8; 4],
    },
    /// The version byte is not one of 2, 3 or 4.
    #[error("unsupported protocol version {version}")]
    UnknownVersion {
        /// The rejected version byte.
        version: u8,
    },
    /// The declared size cannot hold the fixed header of the version.
    #[error("declared frame size {size} is shorter than the {minimum}-byte v{version} header")]
    Truncated {
        /// Protocol version of the frame.
        version: u8,
        /// Size declared by the frame prefix.
        size: u32,
        /// Minimum size required by the version.
        minimum: usize,
    },
    /// A computed field end lies beyond the declared frame size.
    #[error("field `{field}` ends at byte {end} beyond declared frame size {size}")]
    Overrun {
        /// Name of the offending field.
        field: &'static str,
        /// Offset one past the field's last byte.
        end: usize,
        /// Size declared by the frame prefix.
        size: u32,
    },
    /// The action name is not valid UTF-8.
    #[error("action name is not valid UTF-8")]
    InvalidAction,
    /// A field is longer than its slot in the selected version.
    #[error("field `{field}` is {len} bytes but v{version} allows at most {max}")]
    FieldTooLong {
        /// Name of the offending field.
        field: &'static str,
        /// Logical length of the value.
        len: usize,
        /// Largest length the slot can carry.
        max: usize,
        /// Protocol version selected for encoding.
        version: u8,
    },
    /// A numeric field does not fit its slot in the selected version.
    #[error("field `{field}` value {value} exceeds the v{version} maximum {max}")]
    OutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// Value that was supplied.
        value: u64,
        /// Largest value the slot can carry.
        max: u64,
        /// Protocol version selected for encoding.
        version: u8,
    },
    /// The encoded frame would not fit the 32-bit size prefix.
    #[error("frame of {len} bytes exceeds the 32-bit size prefix")]
    FrameTooLarge {
        /// Length of the frame body after the size prefix.
        len: usize,
    },
}

impl WireError {
    pub(crate) const fn too_long(field: &'static str, len: usize, max: usize, version: u8) -> Self {
        Self::FieldTooLong {
            field,
            len,
            max,
            version,
        }
    }
}
