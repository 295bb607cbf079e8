//! Little-endian primitive reads and writes over byte buffers.
//!
//! Guest structures (thread/process blocks, loader records, exception records and context
//! records) are all little-endian x86 layouts. This module provides the bounds-checked helpers
//! the rest of the crate uses to serialize and deserialize them, either at the start of a
//! buffer ([`read_le`], [`write_le`]) or at a running offset that is advanced past the value
//! ([`read_le_at`], [`write_le_at`]).
//!
//! # Examples
//!
//! ```rust
//! use ntscope::file::io::{read_le_at, write_le_at};
//!
//! let mut buffer = [0u8; 8];
//! let mut offset = 0;
//! write_le_at(&mut buffer, &mut offset, 0xC000_0005_u32)?;
//! write_le_at(&mut buffer, &mut offset, 0x0040_1000_u32)?;
//!
//! let mut offset = 0;
//! assert_eq!(read_le_at::<u32>(&buffer, &mut offset)?, 0xC000_0005);
//! assert_eq!(read_le_at::<u32>(&buffer, &mut offset)?, 0x0040_1000);
//! # Ok::<(), ntscope::Error>(())
//! ```

use crate::{Error::OutOfBounds, Result};

/// Primitive types that can be moved in and out of guest byte buffers.
pub trait GuestIO: Sized {
    /// Fixed-size byte representation of the type.
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Build a value from its little-endian representation.
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Produce the little-endian representation of the value.
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_guest_io {
    ($($ty:ty => $len:expr),* $(,)?) => {
        $(
            impl GuestIO for $ty {
                type Bytes = [u8; $len];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_guest_io!(
    u8 => 1,
    u16 => 2,
    u32 => 4,
    i32 => 4,
    u64 => 8,
);

/// Read a little-endian value from the start of `data`.
///
/// # Errors
/// Returns [`OutOfBounds`] if `data` is shorter than the value.
pub fn read_le<T: GuestIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Read a little-endian value at `offset`, advancing `offset` past it.
///
/// # Errors
/// Returns [`OutOfBounds`] if the value does not fit in `data` at `offset`.
pub fn read_le_at<T: GuestIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(OutOfBounds);
    };

    *offset = end;

    Ok(T::from_le_bytes(read))
}

/// Write a little-endian value to the start of `data`.
///
/// # Errors
/// Returns [`OutOfBounds`] if `data` is shorter than the value.
pub fn write_le<T: GuestIO>(data: &mut [u8], value: T) -> Result<()> {
    let mut offset = 0_usize;
    write_le_at(data, &mut offset, value)
}

/// Write a little-endian value at `offset`, advancing `offset` past it.
///
/// # Errors
/// Returns [`OutOfBounds`] if the value does not fit in `data` at `offset`.
pub fn write_le_at<T: GuestIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let bytes = value.to_le_bytes();
    let bytes = bytes.as_ref();
    let Some(end) = offset.checked_add(bytes.len()) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    data[*offset..end].copy_from_slice(bytes);
    *offset = end;

    Ok(())
}

/// Pack a sequence of 32-bit words into a little-endian byte vector.
///
/// Most guest structures written by this crate are plain runs of DWORDs; this is the
/// shorthand for building them.
#[must_use]
pub fn pack_u32s(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|word| word.to_le_bytes()).collect()
}
