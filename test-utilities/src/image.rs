//! A builder for small little-endian ELF64 executables.
//!
//! Layout: file header, program headers, segment data, then the section
//! contents followed by the section header table. Sections are emitted as
//! `[null, extra string tables.., .symtab, .strtab, .shstrtab]`; `.symtab` and
//! `.strtab` only when at least one symbol was added.

pub const PT_LOAD: u32 = 1;
pub const PT_NOTE: u32 = 4;

pub const PF_X: u32 = 1;
pub const PF_W: u32 = 2;
pub const PF_R: u32 = 4;

const SHT_SYMTAB: u32 = 2;
const SHT_STRTAB: u32 = 3;

const STT_FUNC: u8 = 2;
const STB_GLOBAL: u8 = 1;

const EHDR_SIZE: usize = 64;
const PHDR_SIZE: usize = 56;
const SHDR_SIZE: usize = 64;
const SYM_SIZE: usize = 24;

/// A program header written as-is; `offset` is not patched.
#[derive(Debug, Clone, Copy)]
pub struct RawSegment {
    pub kind: u32,
    pub flags: u32,
    pub offset: u64,
    pub vaddr: u64,
    pub file_size: u64,
    pub mem_size: u64,
}

struct Segment {
    header: RawSegment,
    data: Option<Vec<u8>>,
}

struct Symbol {
    name: String,
    info: u8,
    value: u64,
    size: u64,
}

struct Section {
    name: u32,
    kind: u32,
    offset: u64,
    size: u64,
    link: u32,
    info: u32,
    entry_size: u64,
}

pub struct ElfBuilder {
    entry: u64,
    segments: Vec<Segment>,
    symbols: Vec<Symbol>,
    string_tables: Vec<(String, Vec<u8>)>,
}

impl ElfBuilder {
    pub fn new(entry: u64) -> Self {
        ElfBuilder {
            entry,
            segments: Vec::new(),
            symbols: Vec::new(),
            string_tables: Vec::new(),
        }
    }

    /// A loadable segment whose file bytes are `data`.
    pub fn segment(mut self, vaddr: u64, flags: u32, data: &[u8], mem_size: usize) -> Self {
        self.segments.push(Segment {
            header: RawSegment {
                kind: PT_LOAD,
                flags,
                offset: 0,
                vaddr,
                file_size: data.len() as u64,
                mem_size: mem_size as u64,
            },
            data: Some(data.to_vec()),
        });
        self
    }

    pub fn raw_segment(mut self, header: RawSegment) -> Self {
        self.segments.push(Segment { header, data: None });
        self
    }

    /// A global function symbol. An empty name is written with name offset 0.
    pub fn function(self, name: &str, value: u64, size: u64) -> Self {
        self.symbol(name, (STB_GLOBAL << 4) | STT_FUNC, value, size)
    }

    pub fn symbol(mut self, name: &str, info: u8, value: u64, size: u64) -> Self {
        self.symbols.push(Symbol {
            name: String::from(name),
            info,
            value,
            size,
        });
        self
    }

    /// An additional string table, placed before `.strtab`.
    pub fn string_table(mut self, name: &str, contents: &[u8]) -> Self {
        self.string_tables
            .push((String::from(name), contents.to_vec()));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let ph_count = self.segments.len();
        let mut image = vec![0u8; EHDR_SIZE + ph_count * PHDR_SIZE];

        let mut headers = Vec::with_capacity(ph_count);
        for segment in self.segments {
            let mut header = segment.header;

            if let Some(data) = segment.data {
                align(&mut image, 8);
                header.offset = image.len() as u64;
                image.extend_from_slice(&data);
            }

            headers.push(header);
        }

        for (i, header) in headers.iter().enumerate() {
            let at = EHDR_SIZE + i * PHDR_SIZE;
            put_u32(&mut image, at, header.kind);
            put_u32(&mut image, at + 4, header.flags);
            put_u64(&mut image, at + 8, header.offset);
            put_u64(&mut image, at + 16, header.vaddr);
            put_u64(&mut image, at + 24, header.vaddr);
            put_u64(&mut image, at + 32, header.file_size);
            put_u64(&mut image, at + 40, header.mem_size);
            put_u64(&mut image, at + 48, 0x1000);
        }

        let mut shstrtab = vec![0u8];
        let mut sections = vec![Section {
            name: 0,
            kind: 0,
            offset: 0,
            size: 0,
            link: 0,
            info: 0,
            entry_size: 0,
        }];

        for (name, contents) in self.string_tables.iter() {
            let name = push_str(&mut shstrtab, name);
            let offset = append_section(&mut image, contents);

            sections.push(Section {
                name,
                kind: SHT_STRTAB,
                offset,
                size: contents.len() as u64,
                link: 0,
                info: 0,
                entry_size: 0,
            });
        }

        if !self.symbols.is_empty() {
            let mut strtab = vec![0u8];
            let mut symtab = vec![0u8; SYM_SIZE];

            for symbol in self.symbols.iter() {
                let name = if symbol.name.is_empty() {
                    0
                } else {
                    push_str(&mut strtab, &symbol.name)
                };

                let mut raw = [0u8; SYM_SIZE];
                raw[0..4].copy_from_slice(&name.to_le_bytes());
                raw[4] = symbol.info;
                // SHN_ABS
                raw[6..8].copy_from_slice(&0xfff1u16.to_le_bytes());
                raw[8..16].copy_from_slice(&symbol.value.to_le_bytes());
                raw[16..24].copy_from_slice(&symbol.size.to_le_bytes());

                symtab.extend_from_slice(&raw);
            }

            let strtab_index = sections.len() as u32 + 1;

            let name = push_str(&mut shstrtab, ".symtab");
            let offset = append_section(&mut image, &symtab);
            sections.push(Section {
                name,
                kind: SHT_SYMTAB,
                offset,
                size: symtab.len() as u64,
                link: strtab_index,
                info: 1,
                entry_size: SYM_SIZE as u64,
            });

            let name = push_str(&mut shstrtab, ".strtab");
            let offset = append_section(&mut image, &strtab);
            sections.push(Section {
                name,
                kind: SHT_STRTAB,
                offset,
                size: strtab.len() as u64,
                link: 0,
                info: 0,
                entry_size: 0,
            });
        }

        let name = push_str(&mut shstrtab, ".shstrtab");
        let size = shstrtab.len() as u64;
        let offset = append_section(&mut image, &shstrtab);
        sections.push(Section {
            name,
            kind: SHT_STRTAB,
            offset,
            size,
            link: 0,
            info: 0,
            entry_size: 0,
        });

        align(&mut image, 8);
        let sh_offset = image.len();

        for section in sections.iter() {
            let mut raw = [0u8; SHDR_SIZE];
            raw[0..4].copy_from_slice(&section.name.to_le_bytes());
            raw[4..8].copy_from_slice(&section.kind.to_le_bytes());
            raw[24..32].copy_from_slice(&section.offset.to_le_bytes());
            raw[32..40].copy_from_slice(&section.size.to_le_bytes());
            raw[40..44].copy_from_slice(&section.link.to_le_bytes());
            raw[44..48].copy_from_slice(&section.info.to_le_bytes());
            raw[48..56].copy_from_slice(&1u64.to_le_bytes());
            raw[56..64].copy_from_slice(&section.entry_size.to_le_bytes());

            image.extend_from_slice(&raw);
        }

        image[0..4].copy_from_slice(b"\x7fELF");
        image[4] = 2; // ELFCLASS64
        image[5] = 1; // little endian
        image[6] = 1;
        put_u16(&mut image, 16, 2); // ET_EXEC
        put_u16(&mut image, 18, 243); // EM_RISCV
        put_u32(&mut image, 20, 1);
        put_u64(&mut image, 24, self.entry);
        put_u64(&mut image, 32, EHDR_SIZE as u64);
        put_u64(&mut image, 40, sh_offset as u64);
        put_u16(&mut image, 52, EHDR_SIZE as u16);
        put_u16(&mut image, 54, PHDR_SIZE as u16);
        put_u16(&mut image, 56, ph_count as u16);
        put_u16(&mut image, 58, SHDR_SIZE as u16);
        put_u16(&mut image, 60, sections.len() as u16);
        put_u16(&mut image, 62, (sections.len() - 1) as u16);

        image
    }
}

fn align(image: &mut Vec<u8>, to: usize) {
    let len = image.len().next_multiple_of(to);
    image.resize(len, 0);
}

fn append_section(image: &mut Vec<u8>, contents: &[u8]) -> u64 {
    align(image, 8);
    let offset = image.len() as u64;
    image.extend_from_slice(contents);
    offset
}

fn push_str(table: &mut Vec<u8>, s: &str) -> u32 {
    let offset = table.len() as u32;
    table.extend_from_slice(s.as_bytes());
    table.push(0);
    offset
}

fn put_u16(image: &mut [u8], at: usize, value: u16) {
    image[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(image: &mut [u8], at: usize, value: u32) {
    image[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_u64(image: &mut [u8], at: usize, value: u64) {
    image[at..at + 8].copy_from_slice(&value.to_le_bytes());
}
