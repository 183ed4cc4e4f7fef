use abstractions::IUsizeAlias;
use address::VirtualAddress;
use alloc::{vec, vec::Vec};
use core::fmt::{self, Display};

use crate::{read_exact_at, IImageSource, ISegmentMemory, ImageHeader, ProgramSegment};

/// Walks a program image read through an [`IImageSource`].
pub struct ImageLoader<'a> {
    source: &'a dyn IImageSource,
    header: ImageHeader,
}

impl<'a> ImageLoader<'a> {
    /// Reads and validates the image header at offset 0.
    ///
    /// Fails with [`LoadError::UnableToReadExecutable`] if the header can not be read in full,
    /// and with [`LoadError::NotExecutable`] if it is not a little-endian ELF64 header.
    pub fn init(source: &'a dyn IImageSource) -> Result<Self, LoadError> {
        let mut raw = [0u8; ImageHeader::SIZE];
        read_exact_at(source, 0, &mut raw)?;

        let header = ImageHeader::parse(&raw).map_err(|reason| {
            log::debug!("Rejected image header: {reason}");
            LoadError::NotExecutable
        })?;

        Ok(ImageLoader { source, header })
    }

    pub fn header(&self) -> &ImageHeader {
        &self.header
    }

    pub fn source(&self) -> &'a dyn IImageSource {
        self.source
    }

    pub fn entry_point(&self) -> VirtualAddress {
        VirtualAddress::from_usize(self.header.entry as usize)
    }

    /// Reads every program header in table order.
    pub fn segments(&self) -> Result<Vec<ProgramSegment>, LoadError> {
        let count = self.header.ph_count as usize;

        if count == 0 {
            return Ok(Vec::new());
        }

        let stride = self.header.ph_entry_size as usize;
        if stride < ProgramSegment::SIZE {
            return Err(LoadError::MalformedTable);
        }

        let mut segments = Vec::with_capacity(count);
        let mut raw = [0u8; ProgramSegment::SIZE];

        for i in 0..count {
            let offset = table_entry_offset(self.header.ph_offset, stride, i)?;

            read_exact_at(self.source, offset, &mut raw)?;
            segments.push(ProgramSegment::parse(&raw));
        }

        Ok(segments)
    }

    /// Copies every loadable segment into `memory`.
    ///
    /// All descriptors are validated before the first byte is copied, so a malformed
    /// segment anywhere in the table leaves `memory` untouched. For each loadable
    /// segment the hook reserves `[vaddr, vaddr + memsz)`, then the first `filesz`
    /// bytes are copied from the image. The hook guarantees the remainder reads as zero.
    ///
    /// Returns the number of segments loaded.
    pub fn load(&self, memory: &mut dyn ISegmentMemory) -> Result<usize, LoadError> {
        let segments = self.segments()?;

        for segment in segments.iter().filter(|s| s.is_loadable()) {
            validate_segment(segment)?;
        }

        let mut loaded = 0;

        for segment in segments.iter() {
            if !segment.is_loadable() {
                log::trace!("Skipping segment: {segment:?}");
                continue;
            }

            let vaddr = VirtualAddress::from_usize(segment.vaddr as usize);
            let mem_size = segment.mem_size as usize;

            log::debug!(
                "Loading segment {vaddr}..{} (file {:#x} bytes at {:#x})",
                vaddr + mem_size,
                segment.file_size,
                segment.offset
            );

            memory.reserve(vaddr, mem_size, segment.mapping_flags())?;
            self.copy_segment(segment, vaddr, memory)?;

            loaded += 1;
        }

        Ok(loaded)
    }

    fn copy_segment(
        &self,
        segment: &ProgramSegment,
        vaddr: VirtualAddress,
        memory: &mut dyn ISegmentMemory,
    ) -> Result<(), LoadError> {
        let file_size = segment.file_size as usize;
        let offset = segment.offset as usize;

        if offset.checked_add(file_size).is_none() {
            return Err(LoadError::UnableToReadExecutable);
        }

        let mut chunk = vec![0u8; file_size.min(constants::PAGE_SIZE)];
        let mut copied = 0;

        while copied < file_size {
            let len = chunk.len().min(file_size - copied);
            let buf = &mut chunk[..len];

            read_exact_at(self.source, offset + copied, buf)?;
            memory.write(vaddr + copied, buf)?;

            copied += len;
        }

        Ok(())
    }
}

fn validate_segment(segment: &ProgramSegment) -> Result<(), LoadError> {
    if segment.mem_size < segment.file_size {
        log::error!(
            "Segment at {:#x} has memsz {:#x} < filesz {:#x}",
            segment.vaddr,
            segment.mem_size,
            segment.file_size
        );
        return Err(LoadError::MalformedSegment);
    }

    let end = segment.vaddr.checked_add(segment.mem_size);

    if end.is_none() || end.is_some_and(|end| end > usize::MAX as u64) {
        log::error!(
            "Segment at {:#x} with memsz {:#x} wraps the address space",
            segment.vaddr,
            segment.mem_size
        );
        return Err(LoadError::AddressOverflow);
    }

    Ok(())
}

pub(crate) fn table_entry_offset(base: u64, stride: usize, index: usize) -> Result<usize, LoadError> {
    stride
        .checked_mul(index)
        .and_then(|off| (base as usize).checked_add(off))
        .ok_or(LoadError::UnableToReadExecutable)
}

/// The error type for loading a program image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// The image is not a little-endian ELF64 executable.
    NotExecutable,
    /// Reading the image failed or returned fewer bytes than required.
    UnableToReadExecutable,
    /// A loadable segment declares a memory size smaller than its file size.
    MalformedSegment,
    /// A loadable segment's `vaddr + memsz` wraps the address width.
    AddressOverflow,
    /// A header table declares entries smaller than the records it should hold.
    MalformedTable,
    /// The segment allocation hook failed to map or write the segment.
    FailedToLoad,
    /// The kernel ran out of physical frames.
    InsufficientMemory,
}

impl Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            LoadError::NotExecutable => "not a recognized image",
            LoadError::UnableToReadExecutable => "I/O failure while reading the image",
            LoadError::MalformedSegment => "segment memory size is smaller than its file size",
            LoadError::AddressOverflow => "segment address range overflows",
            LoadError::MalformedTable => "header table entry size is too small",
            LoadError::FailedToLoad => "failed to map a segment",
            LoadError::InsufficientMemory => "out of physical memory",
        };

        f.write_str(reason)
    }
}
