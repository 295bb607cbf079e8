//! Module image access and parsing.
//!
//! This module turns native executable images into the
//! [`ModuleDescriptor`](crate::emulation::ModuleDescriptor) values the environment builder
//! needs: image base, entry point and image size. Parsing is delegated to `goblin`; the raw
//! bytes are held either in memory or behind a read-only memory map.
//!
//! # Key Components
//!
//! - [`File`] - A parsed PE image together with its backing bytes
//! - [`ImageParser`] - The capability the module registry uses to turn a path or buffer into a
//!   descriptor; implemented by [`PeParser`]
//! - [`io`] - Little-endian helpers used for every guest structure
//! - [`parser`] - Bounds-checked cursor for field-by-field decoding
//!
//! # Examples
//!
//! ```rust,no_run
//! use ntscope::file::{ImageParser, PeParser};
//! use std::path::Path;
//!
//! let descriptor = PeParser.parse_path(Path::new("win_dll/ntdll.dll"), "ntdll.dll")?;
//! println!("ntdll at {:#x}, entry {:#x}", descriptor.image_base, descriptor.entry_point);
//! # Ok::<(), ntscope::Error>(())
//! ```

pub mod io;
pub mod parser;

mod memory;
mod physical;

use std::path::Path;

use crate::{
    emulation::ModuleDescriptor,
    Error::{Empty, GoblinErr},
    Result,
};
use goblin::pe::{section_table::SectionTable, PE};
use memory::ImageBuffer;
use ouroboros::self_referencing;
use physical::Physical;

/// Abstraction over the storage holding an image's raw bytes.
pub trait Backend: Send + Sync {
    /// Bounds-checked view of `len` bytes starting at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range exceeds the data.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// The complete data.
    fn data(&self) -> &[u8];

    /// Length of the data in bytes.
    fn len(&self) -> usize;
}

/// A parsed PE image and the bytes it was parsed from.
///
/// Only images carrying an optional header are accepted, since the image base, entry point
/// and image size all live there.
#[self_referencing]
pub struct File {
    data: Box<dyn Backend>,
    #[borrows(data)]
    #[not_covariant]
    pe: PE<'this>,
}

impl File {
    /// Parse an image from disk through a read-only memory map.
    ///
    /// # Errors
    /// Returns an error if the file cannot be mapped or is not a PE image with an optional
    /// header.
    pub fn from_file(file: &Path) -> Result<File> {
        let input = Physical::new(file)?;

        Self::load(input)
    }

    /// Parse an image from an owned buffer.
    ///
    /// # Errors
    /// Returns an error if the buffer is empty or is not a PE image with an optional header.
    pub fn from_mem(data: Vec<u8>) -> Result<File> {
        let input = ImageBuffer::new(data);

        Self::load(input)
    }

    fn load<T: Backend + 'static>(data: T) -> Result<File> {
        if data.len() == 0 {
            return Err(Empty);
        }

        let data = Box::new(data);

        File::try_new(data, |data| match PE::parse(data.data()) {
            Ok(pe) => {
                if pe.header.optional_header.is_none() {
                    Err(malformed_error!("File does not have an OptionalHeader"))
                } else {
                    Ok(pe)
                }
            }
            Err(error) => Err(GoblinErr(error)),
        })
    }

    /// Size of the underlying data in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.with_data(|data| data.len())
    }

    /// Whether the underlying data is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this is a PE32+ image
    #[must_use]
    pub fn is_64(&self) -> bool {
        self.with_pe(|pe| pe.is_64)
    }

    /// Preferred image base from the optional header
    #[must_use]
    pub fn imagebase(&self) -> u64 {
        self.with_pe(|pe| pe.image_base as u64)
    }

    /// Entry point RVA, `0` for images without one
    #[must_use]
    pub fn entry_point_rva(&self) -> u64 {
        self.with_pe(|pe| {
            pe.header
                .optional_header
                .map_or(0, |oh| oh.standard_fields.address_of_entry_point as u64)
        })
    }

    /// `SizeOfImage` from the optional header
    #[must_use]
    pub fn size_of_image(&self) -> u64 {
        self.with_pe(|pe| {
            pe.header
                .optional_header
                .map_or(0, |oh| oh.windows_fields.size_of_image as u64)
        })
    }

    /// Section headers of the image
    #[must_use]
    pub fn sections(&self) -> Vec<SectionTable> {
        self.with_pe(|pe| pe.sections.clone())
    }

    /// Raw image bytes
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.with_data(|data| data.data())
    }

    /// Build the loader-facing descriptor of this image.
    ///
    /// The entry point is converted from an RVA to a virtual address against the preferred
    /// image base, matching what a loader record's `EntryPoint` field holds.
    ///
    /// # Arguments
    /// * `name` - Display name (usually the lowercase file name)
    /// * `path` - Guest-visible path of the image
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the image does not fit a 32-bit guest.
    pub fn descriptor(&self, name: &str, path: &str) -> Result<ModuleDescriptor> {
        let image_base = u32::try_from(self.imagebase())
            .map_err(|_| malformed_error!("Image base {:#x} exceeds 32 bits", self.imagebase()))?;
        let entry_rva = u32::try_from(self.entry_point_rva()).map_err(|_| {
            malformed_error!("Entry point {:#x} exceeds 32 bits", self.entry_point_rva())
        })?;
        let image_size = u32::try_from(self.size_of_image())
            .map_err(|_| malformed_error!("Image size {:#x} exceeds 32 bits", self.size_of_image()))?;

        Ok(ModuleDescriptor::new(
            name,
            path,
            image_base,
            image_base.wrapping_add(entry_rva),
            image_size,
        ))
    }
}

/// Turns module images into descriptors.
///
/// The module registry takes any implementation, so callers with their own image loader can
/// plug it in instead of [`PeParser`].
pub trait ImageParser {
    /// Parse the image at `path`.
    ///
    /// # Arguments
    /// * `path` - Host path to read the image from
    /// * `guest_path` - Guest-visible path recorded in the descriptor
    ///
    /// # Errors
    /// Returns an error if the image cannot be read or parsed.
    fn parse_path(&self, path: &Path, guest_path: &str) -> Result<ModuleDescriptor>;

    /// Parse an image already held in memory.
    ///
    /// # Errors
    /// Returns an error if the buffer is not a valid image.
    fn parse_bytes(&self, data: Vec<u8>, guest_path: &str) -> Result<ModuleDescriptor>;
}

/// [`ImageParser`] backed by [`File`] and `goblin`.
#[derive(Clone, Copy, Debug, Default)]
pub struct PeParser;

impl ImageParser for PeParser {
    fn parse_path(&self, path: &Path, guest_path: &str) -> Result<ModuleDescriptor> {
        let file = File::from_file(path)?;
        file.descriptor(&ModuleDescriptor::display_name(guest_path), guest_path)
    }

    fn parse_bytes(&self, data: Vec<u8>, guest_path: &str) -> Result<ModuleDescriptor> {
        let file = File::from_mem(data)?;
        file.descriptor(&ModuleDescriptor::display_name(guest_path), guest_path)
    }
}
