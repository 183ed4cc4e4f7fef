use alloc::{boxed::Box, collections::BTreeMap, string::String, sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::LoadError;

/// Represent a random-readable program image
pub trait IImageSource {
    /// Reads up to `buf.len()` bytes starting at `offset`, returning how many bytes were copied.
    ///
    /// Reading at or past the end of the image is not an error; it yields `Ok(0)`.
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, &'static str>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        // clippy requirement
        self.len() == 0
    }

    /// Releases the underlying host handle. Called exactly once by the bootstrapper.
    fn close(&mut self) {}
}

/// Where program images come from, looked up by name.
pub trait IImageHost {
    fn open(&self, name: &str) -> Result<Box<dyn IImageSource>, &'static str>;
}

/// Fills `buf` from `offset`, treating a short read as an I/O failure.
pub fn read_exact_at(
    source: &(impl IImageSource + ?Sized),
    offset: usize,
    buf: &mut [u8],
) -> Result<(), LoadError> {
    let len = source
        .read_at(offset, buf)
        .map_err(|_| LoadError::UnableToReadExecutable)?;

    if len != buf.len() {
        log::debug!(
            "Short read at {offset:#x}: wanted {} bytes, got {len}",
            buf.len()
        );
        return Err(LoadError::UnableToReadExecutable);
    }

    Ok(())
}

impl IImageSource for &[u8] {
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, &'static str> {
        if offset >= <[u8]>::len(self) {
            return Ok(0);
        }

        let end = core::cmp::min(<[u8]>::len(self), offset.saturating_add(buf.len()));
        let len = end - offset;
        buf[..len].copy_from_slice(&self[offset..end]);

        Ok(len)
    }

    fn len(&self) -> usize {
        <[u8]>::len(self)
    }
}

impl IImageSource for Vec<u8> {
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, &'static str> {
        self.as_slice().read_at(offset, buf)
    }

    fn len(&self) -> usize {
        self.as_slice().len()
    }
}

/// Images that live in kernel memory, e.g. linked in with `include_bytes!`.
#[derive(Default)]
pub struct MemoryImageHost {
    images: BTreeMap<String, Arc<[u8]>>,
    open_handles: Arc<AtomicUsize>,
}

impl MemoryImageHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, image: impl Into<Arc<[u8]>>) {
        self.images.insert(String::from(name), image.into());
    }

    /// Number of images opened and not yet closed.
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::Relaxed)
    }
}

impl IImageHost for MemoryImageHost {
    fn open(&self, name: &str) -> Result<Box<dyn IImageSource>, &'static str> {
        let data = self.images.get(name).ok_or("No such image")?.clone();

        self.open_handles.fetch_add(1, Ordering::Relaxed);

        Ok(Box::new(MemoryImage {
            data,
            open_handles: Some(self.open_handles.clone()),
        }))
    }
}

struct MemoryImage {
    data: Arc<[u8]>,
    open_handles: Option<Arc<AtomicUsize>>,
}

impl IImageSource for MemoryImage {
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, &'static str> {
        let data: &[u8] = &self.data;

        data.read_at(offset, buf)
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn close(&mut self) {
        if let Some(counter) = self.open_handles.take() {
            counter.fetch_sub(1, Ordering::Relaxed);
        }
    }
}
