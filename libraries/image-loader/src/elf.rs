//! On-disk records of a little-endian ELF64 image.
//!
//! Each record is read on its own through positioned reads and decoded with the
//! `xmas_elf` record types. Only the fields the loader and the symbol extractor
//! consume are kept.

use mmu_abstractions::GenericMappingFlags;
use xmas_elf::{
    header::{self, Class, Data},
    program::{self, Flags, ProgramHeader64},
    sections::{self, SectionHeader_, ShType},
    symbol_table::{self, Entry, Entry64},
    P64,
};

/// Copy of one record, aligned for `xmas_elf`'s in-place views.
#[repr(C, align(8))]
struct Aligned<const N: usize>([u8; N]);

impl<const N: usize> Aligned<N> {
    fn copy_of(bytes: &[u8; N]) -> Self {
        Aligned(*bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    pub entry: u64,
    pub ph_offset: u64,
    pub sh_offset: u64,
    pub ph_entry_size: u16,
    pub ph_count: u16,
    pub sh_entry_size: u16,
    pub sh_count: u16,
    pub sh_str_index: u16,
}

impl ImageHeader {
    pub const SIZE: usize = 64;

    /// Decodes the file header, or tells why it is not a little-endian ELF64 image.
    pub fn parse(bytes: &[u8; Self::SIZE]) -> Result<Self, &'static str> {
        let raw = Aligned::copy_of(bytes);
        let header = header::parse_header(&raw.0)?;

        if header.pt1.class() != Class::SixtyFour {
            return Err("Not a 64-bit image");
        }

        if header.pt1.data() != Data::LittleEndian {
            return Err("Not a little-endian image");
        }

        let pt2 = header.pt2;

        Ok(ImageHeader {
            entry: pt2.entry_point(),
            ph_offset: pt2.ph_offset(),
            sh_offset: pt2.sh_offset(),
            ph_entry_size: pt2.ph_entry_size(),
            ph_count: pt2.ph_count(),
            sh_entry_size: pt2.sh_entry_size(),
            sh_count: pt2.sh_count(),
            sh_str_index: pt2.sh_str_index(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramSegment {
    /// `None` for type tags `xmas_elf` does not know.
    pub kind: Option<program::Type>,
    pub flags: Flags,
    pub offset: u64,
    pub vaddr: u64,
    pub file_size: u64,
    pub mem_size: u64,
}

impl ProgramSegment {
    pub const SIZE: usize = core::mem::size_of::<ProgramHeader64>();

    pub fn parse(bytes: &[u8; Self::SIZE]) -> Self {
        let raw = Aligned::copy_of(bytes);
        let ph: &ProgramHeader64 = zero::read(&raw.0);

        ProgramSegment {
            kind: ph.get_type().ok(),
            flags: ph.flags,
            offset: ph.offset,
            vaddr: ph.virtual_addr,
            file_size: ph.file_size,
            mem_size: ph.mem_size,
        }
    }

    pub fn is_loadable(&self) -> bool {
        self.kind == Some(program::Type::Load)
    }

    /// User-mode mapping permissions requested by the segment.
    pub fn mapping_flags(&self) -> GenericMappingFlags {
        let mut flags = GenericMappingFlags::User;

        if self.flags.is_read() {
            flags |= GenericMappingFlags::Readable;
        }

        if self.flags.is_write() {
            flags |= GenericMappingFlags::Writable;
        }

        if self.flags.is_execute() {
            flags |= GenericMappingFlags::Executable;
        }

        flags
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SectionHeader {
    pub name: u32,
    pub kind: Option<ShType>,
    pub offset: u64,
    pub size: u64,
}

impl SectionHeader {
    pub const SIZE: usize = core::mem::size_of::<SectionHeader_<P64>>();

    pub fn parse(bytes: &[u8; Self::SIZE]) -> Self {
        let raw = Aligned::copy_of(bytes);
        let sh = sections::SectionHeader::Sh64(zero::read::<SectionHeader_<P64>>(&raw.0));

        SectionHeader {
            name: sh.name(),
            kind: sh.get_type().ok(),
            offset: sh.offset(),
            size: sh.size(),
        }
    }

    pub fn is_symbol_table(&self) -> bool {
        self.kind == Some(ShType::SymTab)
    }

    pub fn is_string_table(&self) -> bool {
        self.kind == Some(ShType::StrTab)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SymbolRecord {
    pub name: u32,
    /// `None` for type values `xmas_elf` rejects.
    pub kind: Option<symbol_table::Type>,
    pub value: u64,
    pub size: u64,
}

impl SymbolRecord {
    pub const SIZE: usize = core::mem::size_of::<Entry64>();

    pub fn parse(bytes: &[u8; Self::SIZE]) -> Self {
        let raw = Aligned::copy_of(bytes);
        let entry: &Entry64 = zero::read(&raw.0);

        SymbolRecord {
            name: entry.name(),
            kind: entry.get_type().ok(),
            value: entry.value(),
            size: entry.size(),
        }
    }

    /// Functions of any binding count; the binding lives in the other half of `st_info`.
    pub fn is_function(&self) -> bool {
        self.kind == Some(symbol_table::Type::Func)
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.value <= addr && addr - self.value < self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol_bytes(info: u8, value: u64, size: u64) -> [u8; SymbolRecord::SIZE] {
        let mut raw = [0u8; SymbolRecord::SIZE];
        raw[0..4].copy_from_slice(&1u32.to_le_bytes());
        raw[4] = info;
        raw[8..16].copy_from_slice(&value.to_le_bytes());
        raw[16..24].copy_from_slice(&size.to_le_bytes());
        raw
    }

    fn elf64_header() -> [u8; ImageHeader::SIZE] {
        let mut raw = [0u8; ImageHeader::SIZE];
        raw[..4].copy_from_slice(b"\x7fELF");
        raw[4] = 2;
        raw[5] = 1;
        raw[6] = 1;
        raw
    }

    #[test]
    fn test_record_sizes() {
        assert_eq!(ImageHeader::SIZE, 64);
        assert_eq!(ProgramSegment::SIZE, 56);
        assert_eq!(SectionHeader::SIZE, 64);
        assert_eq!(SymbolRecord::SIZE, 24);
    }

    #[test]
    fn test_header_fields() {
        let mut raw = elf64_header();
        raw[24..32].copy_from_slice(&0x8100_0000u64.to_le_bytes());
        raw[32..40].copy_from_slice(&64u64.to_le_bytes());
        raw[54..56].copy_from_slice(&56u16.to_le_bytes());
        raw[56..58].copy_from_slice(&3u16.to_le_bytes());
        raw[62..64].copy_from_slice(&7u16.to_le_bytes());

        let header = ImageHeader::parse(&raw).unwrap();

        assert_eq!(header.entry, 0x8100_0000);
        assert_eq!(header.ph_offset, 64);
        assert_eq!(header.ph_entry_size, 56);
        assert_eq!(header.ph_count, 3);
        assert_eq!(header.sh_str_index, 7);
    }

    #[test]
    fn test_bad_magic() {
        let mut raw = elf64_header();
        raw[..4].copy_from_slice(b"\x7fELG");

        assert!(ImageHeader::parse(&raw).is_err());
    }

    #[test]
    fn test_only_little_endian_elf64_is_accepted() {
        let mut narrow = elf64_header();
        narrow[4] = 1;

        let mut big = elf64_header();
        big[5] = 2;

        assert!(ImageHeader::parse(&narrow).is_err());
        assert!(ImageHeader::parse(&big).is_err());
        assert!(ImageHeader::parse(&elf64_header()).is_ok());
    }

    #[test]
    fn test_segment_fields_and_flags() {
        let mut raw = [0u8; ProgramSegment::SIZE];
        raw[0..4].copy_from_slice(&1u32.to_le_bytes());
        raw[4..8].copy_from_slice(&5u32.to_le_bytes());
        raw[8..16].copy_from_slice(&0x1000u64.to_le_bytes());
        raw[16..24].copy_from_slice(&0x8100_0000u64.to_le_bytes());
        raw[32..40].copy_from_slice(&0x20u64.to_le_bytes());
        raw[40..48].copy_from_slice(&0x40u64.to_le_bytes());

        let segment = ProgramSegment::parse(&raw);

        assert!(segment.is_loadable());
        assert_eq!(segment.offset, 0x1000);
        assert_eq!(segment.vaddr, 0x8100_0000);
        assert_eq!(segment.file_size, 0x20);
        assert_eq!(segment.mem_size, 0x40);

        let flags = segment.mapping_flags();

        assert!(flags.contains(GenericMappingFlags::User | GenericMappingFlags::Executable));
        assert!(flags.contains(GenericMappingFlags::Readable));
        assert!(!flags.contains(GenericMappingFlags::Writable));
    }

    #[test]
    fn test_note_segment_is_not_loadable() {
        let mut raw = [0u8; ProgramSegment::SIZE];
        raw[0..4].copy_from_slice(&4u32.to_le_bytes());

        let segment = ProgramSegment::parse(&raw);

        assert_eq!(segment.kind, Some(program::Type::Note));
        assert!(!segment.is_loadable());
    }

    #[test]
    fn test_section_kind() {
        let mut raw = [0u8; SectionHeader::SIZE];
        raw[0..4].copy_from_slice(&9u32.to_le_bytes());
        raw[4..8].copy_from_slice(&2u32.to_le_bytes());
        raw[24..32].copy_from_slice(&0x200u64.to_le_bytes());
        raw[32..40].copy_from_slice(&0x30u64.to_le_bytes());

        let section = SectionHeader::parse(&raw);

        assert!(section.is_symbol_table());
        assert!(!section.is_string_table());
        assert_eq!(section.name, 9);
        assert_eq!(section.offset, 0x200);
        assert_eq!(section.size, 0x30);
    }

    #[test]
    fn test_symbol_kind_ignores_binding() {
        let global = SymbolRecord::parse(&symbol_bytes(0x12, 0, 0));
        let local = SymbolRecord::parse(&symbol_bytes(0x02, 0, 0));
        let object = SymbolRecord::parse(&symbol_bytes(0x11, 0, 0));
        let invalid = SymbolRecord::parse(&symbol_bytes(0x18, 0, 0));

        assert!(global.is_function());
        assert!(local.is_function());
        assert!(!object.is_function());
        assert!(!invalid.is_function());
    }

    #[test]
    fn test_symbol_contains_is_half_open() {
        let symbol = SymbolRecord::parse(&symbol_bytes(0x12, 0x100, 0x10));

        assert_eq!(symbol.name, 1);
        assert!(!symbol.contains(0xff));
        assert!(symbol.contains(0x100));
        assert!(symbol.contains(0x10f));
        assert!(!symbol.contains(0x110));
    }
}
