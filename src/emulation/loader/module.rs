//! Module descriptors, roles and lookup keys.

use std::fmt;

use widestring::{U16Str, U16String};

/// Loader-facing facts about one module image.
///
/// Produced by an [`ImageParser`](crate::file::ImageParser) or synthesized, as for the
/// zero-sized sentinel that terminates the loader lists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleDescriptor {
    /// Lowercase base name, e.g. `kernel32.dll`
    pub name: String,
    /// Guest-visible path as given by the caller
    pub path: String,
    /// Preferred image base
    pub image_base: u32,
    /// Entry point virtual address (image base + entry RVA)
    pub entry_point: u32,
    /// `SizeOfImage`
    pub image_size: u32,
}

impl ModuleDescriptor {
    /// Creates a new descriptor.
    #[must_use]
    pub fn new(name: &str, path: &str, image_base: u32, entry_point: u32, image_size: u32) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            image_base,
            entry_point,
            image_size,
        }
    }

    /// The empty, zero-sized module placed last in every loader list.
    #[must_use]
    pub fn sentinel() -> Self {
        Self::new("", "", 0, 0, 0)
    }

    /// Lowercase base name of `path`; both `/` and `\` are accepted as separators.
    ///
    /// ```rust
    /// use ntscope::emulation::ModuleDescriptor;
    ///
    /// assert_eq!(ModuleDescriptor::display_name("win_dll/KERNEL32.dll"), "kernel32.dll");
    /// assert_eq!(ModuleDescriptor::display_name("c:\\xxx\\toto.exe"), "toto.exe");
    /// ```
    #[must_use]
    pub fn display_name(path: &str) -> String {
        path.rsplit(|c| c == '/' || c == '\\')
            .next()
            .unwrap_or(path)
            .to_lowercase()
    }

    /// Path as written into the guest: forward slashes become backslashes.
    #[must_use]
    pub fn guest_path(&self) -> String {
        self.path.replace('/', "\\")
    }
}

/// Role of a registry entry in the loader lists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModuleRole {
    /// The main executable; first in load and memory order, absent from init order
    Main,
    /// The list terminator; always last
    Sentinel,
    /// Any other module
    Ordinary,
}

/// Case-insensitive module lookup key in guest wide-string form.
///
/// Holds the UTF-16LE bytes of the lowercase base name, the representation the guest's
/// `UNICODE_STRING` buffers use.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleKey(Vec<u8>);

impl ModuleKey {
    /// Key for a module name or path; the base name is extracted and lowercased.
    #[must_use]
    pub fn new(name: &str) -> Self {
        ModuleKey(wide_bytes(&ModuleDescriptor::display_name(name)))
    }

    /// UTF-16LE bytes of the key.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Byte length of the key, as stored in `UNICODE_STRING.Length`.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether this is the sentinel's empty key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let units: Vec<u16> = self
            .0
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        write!(f, "{}", U16Str::from_slice(&units).to_string_lossy())
    }
}

/// Where a module's descriptor comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModuleSource {
    /// Already parsed
    Descriptor(ModuleDescriptor),
    /// Parse the image at this path
    Path(String),
}

impl ModuleSource {
    /// Guest-visible path of the module.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            ModuleSource::Descriptor(descriptor) => &descriptor.path,
            ModuleSource::Path(path) => path,
        }
    }

    /// Name the module is keyed by: its path, or the descriptor's name if the path is empty.
    #[must_use]
    pub fn key_name(&self) -> &str {
        match self {
            ModuleSource::Descriptor(descriptor) if descriptor.path.is_empty() => {
                &descriptor.name
            }
            _ => self.path(),
        }
    }
}

impl From<ModuleDescriptor> for ModuleSource {
    fn from(descriptor: ModuleDescriptor) -> Self {
        ModuleSource::Descriptor(descriptor)
    }
}

impl From<&str> for ModuleSource {
    fn from(path: &str) -> Self {
        ModuleSource::Path(path.to_string())
    }
}

/// UTF-16LE encoding of `text`, without terminator.
#[must_use]
pub fn wide_bytes(text: &str) -> Vec<u8> {
    U16String::from_str(text)
        .as_slice()
        .iter()
        .flat_map(|unit| unit.to_le_bytes())
        .collect()
}
