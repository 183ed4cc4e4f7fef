use address::VirtualAddress;
use core::fmt::{self, Display};
use utilities::InvokeOnDrop;

use crate::{IImageHost, ISegmentMemory, ImageLoader, LoadError, SymbolTable};

/// What the process needs to know about its image once loading is done.
#[derive(Debug)]
pub struct BootImage {
    pub entry: VirtualAddress,
    pub symbols: SymbolTable,
    /// Number of loadable segments that were materialized.
    pub segments: usize,
}

/// Opens `argv[0]` on `host`, loads its segments into `memory` and extracts its symbols.
///
/// The image handle is closed before returning, whether loading succeeded or not.
/// A broken symbol table is not an error; the image then boots without symbols.
pub fn bootstrap(
    host: &dyn IImageHost,
    argv: &[&str],
    memory: &mut dyn ISegmentMemory,
) -> Result<BootImage, BootstrapError> {
    let name = *argv.first().ok_or(BootstrapError::MissingProgramName)?;

    log::info!("Application: {name}");

    let source = host.open(name).map_err(|reason| {
        log::error!("Failed to open {name}: {reason}");
        BootstrapError::OpenFailed
    })?;

    let source = InvokeOnDrop::transform(source, |mut source| {
        source.close();
        log::trace!("Closed image {name}");
    });

    let loader = ImageLoader::init(&**source)?;

    let segments = loader.load(memory)?;
    memory.seal()?;

    let symbols = SymbolTable::extract(loader.header(), loader.source()).unwrap_or_else(|e| {
        log::warn!("Ignoring unreadable symbol table: {e}");
        SymbolTable::new()
    });

    let entry = loader.entry_point();

    log::info!("Application program entry point (virtual address): {entry}");

    Ok(BootImage {
        entry,
        symbols,
        segments,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapError {
    MissingProgramName,
    OpenFailed,
    Load(LoadError),
}

impl From<LoadError> for BootstrapError {
    fn from(value: LoadError) -> Self {
        BootstrapError::Load(value)
    }
}

impl Display for BootstrapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapError::MissingProgramName => f.write_str("no program name given"),
            BootstrapError::OpenFailed => f.write_str("unable to open the program image"),
            BootstrapError::Load(e) => write!(f, "unable to load the program image: {e}"),
        }
    }
}
