//! Memory-mapped file backend.
//!
//! [`crate::file::physical::Physical`] maps module images from disk read-only so the image
//! parser can inspect headers without copying the whole file.

use super::Backend;
use crate::{
    Error::{Error, FileError, OutOfBounds},
    Result,
};

use memmap2::Mmap;
use std::{fs, path::Path};

/// A file backend that uses memory-mapped I/O for access to module images on disk.
///
/// All access operations include bounds checking.
#[derive(Debug)]
pub struct Physical {
    /// Memory-mapped file data
    data: Mmap,
}

impl Physical {
    /// Create a new physical file backend by memory-mapping the specified file.
    ///
    /// # Arguments
    /// * `path` - Path to the image on disk
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or
    /// [`crate::Error::Error`] if memory mapping fails.
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let file = match fs::File::open(path) {
            Ok(file) => file,
            Err(error) => return Err(FileError(error)),
        };

        // SAFETY: the mapping is read-only and the file handle is kept alive by the map.
        let mmap = match unsafe { Mmap::map(&file) } {
            Ok(mmap) => mmap,
            Err(error) => return Err(Error(error.to_string())),
        };

        Ok(Physical { data: mmap })
    }
}

impl Backend for Physical {
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let Some(offset_end) = offset.checked_add(len) else {
            return Err(OutOfBounds);
        };

        if offset_end > self.data.len() {
            return Err(OutOfBounds);
        }

        Ok(&self.data[offset..offset_end])
    }

    fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_physical_invalid_file_path() {
        let result = Physical::new(PathBuf::from("/nonexistent/path/to/ntdll.dll"));
        assert!(result.is_err());
        match result.unwrap_err() {
            FileError(io_error) => {
                assert_eq!(io_error.kind(), std::io::ErrorKind::NotFound);
            }
            _ => panic!("Expected FileError"),
        }
    }

    #[test]
    fn test_physical_small_file() {
        let temp_path = std::env::temp_dir().join("ntscope_physical_small_file.bin");
        let test_data = vec![0x4D, 0x5A, 0x90, 0x00, 0x03, 0x00];
        std::fs::write(&temp_path, &test_data).unwrap();

        let physical = Physical::new(&temp_path).unwrap();
        assert_eq!(physical.len(), 6);
        assert_eq!(physical.data(), test_data.as_slice());
        assert_eq!(physical.data_slice(0, 2).unwrap(), b"MZ");

        assert!(physical.data_slice(usize::MAX, 1).is_err());
        assert!(physical.data_slice(5, 2).is_err());
        let empty_slice: &[u8] = &[];
        assert_eq!(physical.data_slice(6, 0).unwrap(), empty_slice);

        std::fs::remove_file(&temp_path).unwrap();
    }
}
