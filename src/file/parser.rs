//! Cursor-based reader for guest structures.
//!
//! This module provides [`crate::file::parser::Parser`], a small bounds-checked cursor over a
//! byte slice. It is used wherever a guest structure is decoded field by field in declaration
//! order, most notably the exception context record, where unmodeled regions (debug registers,
//! floating-point save area) are skipped rather than read.
//!
//! # Examples
//!
//! ```rust
//! use ntscope::Parser;
//!
//! let data = [0x01, 0x00, 0x00, 0x00, 0xAA, 0xBB, 0x05, 0x00, 0x00, 0x00];
//! let mut parser = Parser::new(&data);
//!
//! assert_eq!(parser.read_le::<u32>()?, 1);
//! parser.skip(2)?;
//! assert_eq!(parser.read_le::<u32>()?, 5);
//! assert!(!parser.has_more_data());
//! # Ok::<(), ntscope::Error>(())
//! ```

use crate::{
    file::io::{read_le_at, GuestIO},
    Error::OutOfBounds,
    Result,
};

/// A bounds-checked little-endian cursor over a byte slice.
///
/// Every read either succeeds and advances the cursor, or fails with
/// [`crate::Error::OutOfBounds`] and leaves the cursor where it was.
pub struct Parser<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new parser positioned at the start of `data`
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Total length of the underlying buffer
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the underlying buffer is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether unread bytes remain
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Number of unread bytes
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Move the cursor to an absolute position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `pos` lies past the end of the buffer.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(OutOfBounds);
        }

        self.position = pos;
        Ok(())
    }

    /// Advance the cursor by `step` bytes without reading them.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `step` bytes remain.
    pub fn skip(&mut self, step: usize) -> Result<()> {
        if step > self.remaining() {
            return Err(OutOfBounds);
        }

        self.position += step;
        Ok(())
    }

    /// Current cursor position
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// The complete underlying buffer
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.data
    }

    /// Read a value without advancing the cursor.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the value does not fit.
    pub fn peek_le<T: GuestIO>(&self) -> Result<T> {
        let mut temp_position = self.position;
        read_le_at::<T>(self.data, &mut temp_position)
    }

    /// Read a value and advance the cursor past it.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the value does not fit.
    pub fn read_le<T: GuestIO>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }
}
