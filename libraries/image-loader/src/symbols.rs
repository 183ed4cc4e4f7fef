use abstractions::IUsizeAlias;
use address::VirtualAddress;
use alloc::{vec, vec::Vec};
use constants::{MAX_FUNCTION_SYMBOLS, SYMBOL_NAME_CAPACITY, SYMBOL_STRING_TABLE};

use crate::{
    loader::table_entry_offset, read_exact_at, IImageSource, ImageHeader, LoadError,
    SectionHeader, SymbolRecord,
};

/// A function name stored inline, at most `SYMBOL_NAME_CAPACITY - 1` bytes long.
#[derive(Clone, Copy)]
pub struct SymbolName {
    bytes: [u8; SYMBOL_NAME_CAPACITY],
    len: usize,
}

impl SymbolName {
    /// Takes the bytes up to the first NUL, cut to capacity and to valid UTF-8.
    pub fn new(raw: &[u8]) -> Self {
        let raw = raw.split(|b| *b == 0).next().unwrap_or_default();
        let raw = &raw[..raw.len().min(SYMBOL_NAME_CAPACITY - 1)];

        let len = match core::str::from_utf8(raw) {
            Ok(s) => s.len(),
            Err(e) => e.valid_up_to(),
        };

        let mut bytes = [0u8; SYMBOL_NAME_CAPACITY];
        bytes[..len].copy_from_slice(&raw[..len]);

        SymbolName { bytes, len }
    }

    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.bytes[..self.len]).unwrap_or_default()
    }
}

impl core::fmt::Debug for SymbolName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FunctionSymbol {
    pub record: SymbolRecord,
    name: SymbolName,
}

impl FunctionSymbol {
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn contains(&self, addr: VirtualAddress) -> bool {
        self.record.contains(addr.as_usize() as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedSymbol<'a> {
    pub name: &'a str,
    /// The program's `main`; a backtrace stops here.
    pub is_main: bool,
}

/// Function symbols of the running image, in section order.
#[derive(Debug, Default)]
pub struct SymbolTable {
    entries: Vec<FunctionSymbol>,
    dropped: usize,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            entries: Vec::with_capacity(MAX_FUNCTION_SYMBOLS),
            dropped: 0,
        }
    }

    /// Reads the function symbols out of the image's `.symtab`.
    ///
    /// An image without a symbol table or without the matching string table yields an
    /// empty table. Only the first `MAX_FUNCTION_SYMBOLS` functions are kept.
    pub fn extract(header: &ImageHeader, source: &dyn IImageSource) -> Result<Self, LoadError> {
        let mut table = SymbolTable::new();

        let count = header.sh_count as usize;
        if count == 0 {
            log::debug!("Image has no section headers");
            return Ok(table);
        }

        let stride = header.sh_entry_size as usize;
        if stride < SectionHeader::SIZE || header.sh_str_index as usize >= count {
            return Err(LoadError::MalformedTable);
        }

        let read_section = |index: usize| -> Result<SectionHeader, LoadError> {
            let mut raw = [0u8; SectionHeader::SIZE];
            let offset = table_entry_offset(header.sh_offset, stride, index)?;
            read_exact_at(source, offset, &mut raw)?;
            Ok(SectionHeader::parse(&raw))
        };

        let names = read_section_bytes(source, &read_section(header.sh_str_index as usize)?)?;

        let mut symtab = None;
        let mut strtab = None;

        for i in 0..count {
            let section = read_section(i)?;

            if section.is_symbol_table() {
                symtab = Some(section);
            } else if section.is_string_table()
                && section_name(&names, section.name) == SYMBOL_STRING_TABLE.as_bytes()
            {
                strtab = Some(section);
            }
        }

        let (Some(symtab), Some(strtab)) = (symtab, strtab) else {
            log::warn!("Image carries no symbol table, backtraces will be unnamed");
            return Ok(table);
        };

        let mut raw = [0u8; SymbolRecord::SIZE];

        for i in 0..(symtab.size as usize) / SymbolRecord::SIZE {
            let offset = table_entry_offset(symtab.offset, SymbolRecord::SIZE, i)?;
            read_exact_at(source, offset, &mut raw)?;

            let record = SymbolRecord::parse(&raw);

            if record.name == 0 || !record.is_function() {
                continue;
            }

            if table.entries.len() == MAX_FUNCTION_SYMBOLS {
                table.dropped += 1;
                continue;
            }

            let name = read_symbol_name(source, &strtab, record.name)?;
            table.entries.push(FunctionSymbol { record, name });
        }

        if table.dropped != 0 {
            log::warn!(
                "Symbol table full, {} function symbols past the first {MAX_FUNCTION_SYMBOLS} were dropped",
                table.dropped
            );
        }

        log::debug!("Extracted {} function symbols", table.entries.len());

        Ok(table)
    }

    /// Finds the first symbol whose `[value, value + size)` covers `addr`.
    pub fn resolve(&self, addr: VirtualAddress) -> Option<ResolvedSymbol<'_>> {
        self.entries
            .iter()
            .find(|symbol| symbol.contains(addr))
            .map(|symbol| ResolvedSymbol {
                name: symbol.name(),
                is_main: symbol.name() == "main",
            })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FunctionSymbol> {
        self.entries.iter()
    }

    /// Function symbols that did not fit.
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

fn read_section_bytes(
    source: &dyn IImageSource,
    section: &SectionHeader,
) -> Result<Vec<u8>, LoadError> {
    // a corrupt size must not turn into a huge allocation
    if section.size > source.len() as u64 {
        return Err(LoadError::UnableToReadExecutable);
    }

    let mut bytes = vec![0u8; section.size as usize];
    read_exact_at(source, section.offset as usize, &mut bytes)?;

    Ok(bytes)
}

fn section_name(names: &[u8], offset: u32) -> &[u8] {
    match names.get(offset as usize..) {
        Some(rest) => rest.split(|b| *b == 0).next().unwrap_or_default(),
        None => &[],
    }
}

fn read_symbol_name(
    source: &dyn IImageSource,
    strtab: &SectionHeader,
    name: u32,
) -> Result<SymbolName, LoadError> {
    let offset = strtab
        .offset
        .checked_add(name as u64)
        .ok_or(LoadError::UnableToReadExecutable)?;

    let mut raw = [0u8; SYMBOL_NAME_CAPACITY];

    // names near the end of the image are legitimately shorter than the buffer
    let len = source
        .read_at(offset as usize, &mut raw)
        .map_err(|_| LoadError::UnableToReadExecutable)?;

    Ok(SymbolName::new(&raw[..len]))
}

#[cfg(test)]
mod tests {
    use alloc::{format, string::String};

    use test_utilities::image::{ElfBuilder, PF_R, PF_X};

    use super::*;
    use crate::ImageLoader;

    const STT_OBJECT: u8 = 1;
    const STB_GLOBAL: u8 = 1;

    fn va(addr: usize) -> VirtualAddress {
        VirtualAddress::from_usize(addr)
    }

    fn extract(image: &[u8]) -> Result<SymbolTable, LoadError> {
        let source: &[u8] = image;
        let loader = ImageLoader::init(&source)?;

        SymbolTable::extract(loader.header(), loader.source())
    }

    fn sample_image() -> Vec<u8> {
        ElfBuilder::new(0x1000)
            .segment(0x1000, PF_R | PF_X, &[0u8; 0x40], 0x400)
            .function("_start", 0x1000, 0x20)
            .symbol("counter", (STB_GLOBAL << 4) | STT_OBJECT, 0x3000, 8)
            .function("", 0x1100, 0x10)
            .function("helper", 0x1020, 0x40)
            .function("main", 0x1060, 0x80)
            .build()
    }

    #[test]
    fn test_keeps_named_functions_in_section_order() {
        let table = extract(&sample_image()).unwrap();

        let names: Vec<&str> = table.iter().map(|s| s.name()).collect();

        assert_eq!(names, alloc::vec!["_start", "helper", "main"]);
        assert_eq!(table.dropped(), 0);
    }

    #[test]
    fn test_resolve_covering_symbol() {
        let table = extract(&sample_image()).unwrap();

        assert_eq!(
            table.resolve(va(0x1030)),
            Some(ResolvedSymbol {
                name: "helper",
                is_main: false
            })
        );
        assert_eq!(table.resolve(va(0x1060)).map(|s| s.is_main), Some(true));
        assert_eq!(table.resolve(va(0x10df)).map(|s| s.name), Some("main"));
    }

    #[test]
    fn test_resolve_misses_outside_every_range() {
        let table = extract(&sample_image()).unwrap();

        // end of main is exclusive
        assert_eq!(table.resolve(va(0x10e0)), None);
        // the object symbol was never recorded
        assert_eq!(table.resolve(va(0x3000)), None);
        assert_eq!(table.resolve(va(0)), None);
    }

    #[test]
    fn test_overlapping_ranges_resolve_in_table_order() {
        let image = ElfBuilder::new(0x1000)
            .function("outer", 0x1000, 0x100)
            .function("inner", 0x1010, 0x10)
            .build();

        let table = extract(&image).unwrap();

        assert_eq!(table.resolve(va(0x1014)).map(|s| s.name), Some("outer"));
    }

    #[test]
    fn test_only_the_named_string_table_is_used() {
        let image = ElfBuilder::new(0x1000)
            .string_table(".dynstr", b"\0decoy_one\0decoy_two\0")
            .function("first", 0x1000, 0x10)
            .function("second", 0x1010, 0x10)
            .build();

        let table = extract(&image).unwrap();

        assert_eq!(table.resolve(va(0x1000)).map(|s| s.name), Some("first"));
        assert_eq!(table.resolve(va(0x1018)).map(|s| s.name), Some("second"));
    }

    #[test]
    fn test_table_is_capped() {
        let mut builder = ElfBuilder::new(0x1000);
        for i in 0..MAX_FUNCTION_SYMBOLS + 6 {
            builder = builder.function(&format!("f{i}"), 0x1000 + 0x10 * i as u64, 0x10);
        }

        let table = extract(&builder.build()).unwrap();

        assert_eq!(table.len(), MAX_FUNCTION_SYMBOLS);
        assert_eq!(table.dropped(), 6);
        assert_eq!(table.iter().last().map(|s| s.name()), Some("f63"));
        assert_eq!(table.resolve(va(0x1000 + 0x10 * 64)), None);
    }

    #[test]
    fn test_long_names_are_truncated() {
        let long: String = core::iter::repeat('x').take(48).collect();
        let image = ElfBuilder::new(0x1000)
            .function(&long, 0x1000, 0x10)
            .build();

        let table = extract(&image).unwrap();
        let name = table.resolve(va(0x1000)).unwrap().name;

        assert_eq!(name.len(), SYMBOL_NAME_CAPACITY - 1);
        assert!(long.starts_with(name));
    }

    #[test]
    fn test_image_without_symbols_gives_empty_table() {
        let image = ElfBuilder::new(0x1000)
            .segment(0x1000, PF_R | PF_X, b"code", 4)
            .build();

        let table = extract(&image).unwrap();

        assert!(table.is_empty());
        assert_eq!(table.resolve(va(0x1000)), None);
    }

    #[test]
    fn test_small_section_header_stride_is_rejected() {
        let mut image = sample_image();
        image[58..60].copy_from_slice(&40u16.to_le_bytes());

        assert_eq!(extract(&image).err(), Some(LoadError::MalformedTable));
    }

    #[test]
    fn test_truncated_section_table_is_io_failure() {
        let image = sample_image();
        let sh_offset = u64::from_le_bytes(image[40..48].try_into().unwrap()) as usize;

        assert_eq!(
            extract(&image[..sh_offset + 10]).err(),
            Some(LoadError::UnableToReadExecutable)
        );
    }

    #[test]
    fn test_symbol_name_stops_at_nul_and_bad_utf8() {
        assert_eq!(SymbolName::new(b"main\0garbage").as_str(), "main");
        assert_eq!(SymbolName::new(b"ok\xffrest").as_str(), "ok");
        assert_eq!(SymbolName::new(b"").as_str(), "");
    }

    #[test]
    fn test_agrees_with_xmas_elf() {
        use xmas_elf::{
            sections::SectionData,
            symbol_table::{Entry, Type},
            ElfFile,
        };

        let image = sample_image();
        let elf = ElfFile::new(&image).unwrap();

        let mut expected = Vec::new();
        for section in elf.section_iter() {
            if let Ok(SectionData::SymbolTable64(entries)) = section.get_data(&elf) {
                for entry in entries {
                    let name = entry.get_name(&elf).unwrap();
                    if !name.is_empty() && matches!(entry.get_type(), Ok(Type::Func)) {
                        expected.push((String::from(name), entry.value(), entry.size()));
                    }
                }
            }
        }

        let table = extract(&image).unwrap();
        let actual: Vec<(String, u64, u64)> = table
            .iter()
            .map(|s| (String::from(s.name()), s.record.value, s.record.size))
            .collect();

        assert_eq!(actual, expected);
    }
}
