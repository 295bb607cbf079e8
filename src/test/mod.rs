//! Helpers shared by unit tests.

/// Offset of the PE signature in images built by [`minimal_pe32`].
const PE_OFFSET: usize = 0x80;

/// Builds the smallest PE32 image goblin accepts: headers only, no sections.
///
/// Only the fields the module registry reads are meaningful; everything else is zero or a
/// plausible constant.
pub fn minimal_pe32(image_base: u32, entry_rva: u32, size_of_image: u32) -> Vec<u8> {
    let mut image = vec![0_u8; 0x200];
    let put16 = |image: &mut Vec<u8>, offset: usize, value: u16| {
        image[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    };
    let put32 = |image: &mut Vec<u8>, offset: usize, value: u32| {
        image[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    };

    // DOS header
    image[0..2].copy_from_slice(b"MZ");
    put32(&mut image, 0x3c, PE_OFFSET as u32);

    // COFF header
    image[PE_OFFSET..PE_OFFSET + 4].copy_from_slice(b"PE\0\0");
    let coff = PE_OFFSET + 4;
    put16(&mut image, coff, 0x014c);
    put16(&mut image, coff + 2, 0);
    put16(&mut image, coff + 16, 0xe0);
    put16(&mut image, coff + 18, 0x0102);

    // Optional header
    let opt = coff + 20;
    put16(&mut image, opt, 0x010b);
    put32(&mut image, opt + 16, entry_rva);
    put32(&mut image, opt + 28, image_base);
    put32(&mut image, opt + 32, 0x1000);
    put32(&mut image, opt + 36, 0x200);
    put16(&mut image, opt + 40, 4);
    put16(&mut image, opt + 48, 4);
    put32(&mut image, opt + 56, size_of_image);
    put32(&mut image, opt + 60, 0x200);
    put16(&mut image, opt + 68, 2);
    put32(&mut image, opt + 72, 0x10_0000);
    put32(&mut image, opt + 76, 0x1000);
    put32(&mut image, opt + 80, 0x10_0000);
    put32(&mut image, opt + 84, 0x1000);
    put32(&mut image, opt + 92, 16);

    image
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_pe32_headers() {
        let image = minimal_pe32(0x0040_0000, 0x1000, 0x5000);

        assert_eq!(&image[0..2], b"MZ");
        assert_eq!(&image[0x80..0x84], b"PE\0\0");
        assert_eq!(
            u32::from_le_bytes([image[0xb4], image[0xb5], image[0xb6], image[0xb7]]),
            0x0040_0000
        );
    }
}
