//! Owned-buffer image backend.
//!
//! Used when the caller already holds a module image, e.g. one embedded in a test or pulled
//! out of a dump, and hands it to [`crate::file::ImageParser::parse_bytes`].

use super::Backend;
use crate::{Error::OutOfBounds, Result};

/// A module image held in an owned byte buffer.
#[derive(Debug)]
pub struct ImageBuffer {
    bytes: Vec<u8>,
}

impl ImageBuffer {
    /// Take ownership of `bytes` as an image.
    pub fn new(bytes: Vec<u8>) -> ImageBuffer {
        ImageBuffer { bytes }
    }
}

impl Backend for ImageBuffer {
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        offset
            .checked_add(len)
            .and_then(|end| self.bytes.get(offset..end))
            .ok_or(OutOfBounds)
    }

    fn data(&self) -> &[u8] {
        &self.bytes
    }

    fn len(&self) -> usize {
        self.bytes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::minimal_pe32;

    #[test]
    fn test_image_buffer_slices() {
        let image = ImageBuffer::new(minimal_pe32(0x0040_0000, 0x1000, 0x5000));

        assert_eq!(image.len(), 0x200);
        assert_eq!(image.data_slice(0, 2).unwrap(), b"MZ");
        assert_eq!(image.data_slice(0x80, 4).unwrap(), b"PE\0\0");
        assert_eq!(image.data_slice(0x200, 0).unwrap(), &[] as &[u8]);
    }

    #[test]
    fn test_image_buffer_out_of_bounds() {
        let image = ImageBuffer::new(vec![0; 100]);

        assert!(matches!(image.data_slice(usize::MAX, 1), Err(OutOfBounds)));
        assert!(matches!(image.data_slice(100, 1), Err(OutOfBounds)));
        assert!(matches!(image.data_slice(99, 2), Err(OutOfBounds)));
    }
}
