use abstractions::IUsizeAlias;
use address::VirtualAddress;
use alloc::{sync::Arc, vec::Vec};
use allocation_abstractions::{FrameDesc, IFrameAllocator};
use constants::{MAX_BACKTRACE_DEPTH, USER_FREE_ADDRESS_START};
use hermit_sync::SpinMutex;
use image_loader::{BootstrapError, IImageHost, MappedSegmentMemory, SymbolTable};
use mmu_abstractions::{MMUError, IMMU};
use user_heap::{HeapError, UserHeap};

/// Distance from a user frame's stack pointer to the first saved return address.
const RETURN_ADDRESS_OFFSET: usize = 40;
/// Distance between two consecutive saved return addresses.
const FRAME_STRIDE: usize = 16;

/// The user registers the kernel needs to resume the process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapFrame {
    pub epc: VirtualAddress,
    pub sp: VirtualAddress,
}

/// The single user process: its address space, heap and image symbols.
pub struct Process {
    pub trapframe: TrapFrame,
    heap: UserHeap,
    symbols: SymbolTable,
    image_frames: Vec<(VirtualAddress, FrameDesc)>,
    mmu: Arc<SpinMutex<dyn IMMU>>,
    alloc: Arc<SpinMutex<dyn IFrameAllocator>>,
}

impl Process {
    pub fn new(mmu: Arc<SpinMutex<dyn IMMU>>, alloc: Arc<SpinMutex<dyn IFrameAllocator>>) -> Self {
        Self::with_heap_start(
            VirtualAddress::from_usize(USER_FREE_ADDRESS_START),
            mmu,
            alloc,
        )
    }

    pub fn with_heap_start(
        heap_start: VirtualAddress,
        mmu: Arc<SpinMutex<dyn IMMU>>,
        alloc: Arc<SpinMutex<dyn IFrameAllocator>>,
    ) -> Self {
        Process {
            trapframe: TrapFrame::default(),
            heap: UserHeap::new(heap_start, mmu.clone(), alloc.clone()),
            symbols: SymbolTable::new(),
            image_frames: Vec::new(),
            mmu,
            alloc,
        }
    }

    /// Loads `argv[0]` from `host` into this process's address space and points
    /// the resume address at its entry.
    pub fn bootstrap(&mut self, host: &dyn IImageHost, argv: &[&str]) -> Result<(), BootstrapError> {
        let mut memory = MappedSegmentMemory::new(self.mmu.clone(), self.alloc.clone());

        let image = image_loader::bootstrap(host, argv, &mut memory)?;

        self.image_frames.extend(memory.into_frames());
        self.trapframe.epc = image.entry;
        self.symbols = image.symbols;

        Ok(())
    }

    /// Like [`Process::bootstrap`], but a failure halts the kernel.
    pub fn load_user_program(&mut self, host: &dyn IImageHost, argv: &[&str]) {
        if let Err(e) = self.bootstrap(host, argv) {
            log::error!("Failed to load the user program: {e}");
            panic!("Failed to load the user program: {e}");
        }
    }

    pub fn allocate(&mut self, size: usize) -> Result<VirtualAddress, HeapError> {
        self.heap.allocate(size)
    }

    pub fn release(&mut self, addr: VirtualAddress) -> Result<(), HeapError> {
        self.heap.release(addr)
    }

    pub fn heap(&self) -> &UserHeap {
        &self.heap
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn mmu(&self) -> &Arc<SpinMutex<dyn IMMU>> {
        &self.mmu
    }

    /// Logs the functions on the user call stack, innermost first.
    ///
    /// Walks at most `depth` saved return addresses (capped at `MAX_BACKTRACE_DEPTH`),
    /// stopping at `main`. Returns the number of frames walked before `main`.
    pub fn backtrace(&self, depth: usize) -> Result<usize, MMUError> {
        let depth = depth.min(MAX_BACKTRACE_DEPTH);
        let mmu = self.mmu.lock();

        let mut slot = self.trapframe.sp + RETURN_ADDRESS_OFFSET;

        for frame in 0..depth {
            let ret = VirtualAddress::from_usize(mmu.read_usize(slot)?);

            match self.symbols.resolve(ret) {
                Some(symbol) => {
                    log::info!("{}", symbol.name);

                    if symbol.is_main {
                        return Ok(frame);
                    }
                }
                None => log::trace!("No symbol covers return address {ret}"),
            }

            slot += FRAME_STRIDE;
        }

        Ok(depth)
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        let mut mmu = self.mmu.lock();
        let mut alloc = self.alloc.lock();

        for (vaddr, frame) in self.image_frames.drain(..) {
            if let Err(e) = mmu.unmap_single(vaddr) {
                log::warn!("Failed to unmap image page {vaddr}: {e:?}");
            }

            alloc.dealloc(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;
    use image_loader::{LoadError, MemoryImageHost};
    use mmu_abstractions::{GenericMappingFlags, PageSize};
    use test_utilities::{
        allocation::TestFrameAllocator,
        image::{ElfBuilder, PF_R, PF_W, PF_X},
        memory::TestMMU,
    };

    use super::*;

    const STACK_PAGE: usize = 0x7fff_f000;

    fn va(addr: usize) -> VirtualAddress {
        VirtualAddress::from_usize(addr)
    }

    fn sample_image() -> Vec<u8> {
        ElfBuilder::new(0x8100_0000)
            .segment(0x8100_0000, PF_R | PF_X, &[0x13u8; 0x100], 0x100)
            .segment(0x8100_2000, PF_R | PF_W, b"globals", 0x20)
            .function("_start", 0x8100_0000, 0x20)
            .function("leaf", 0x8100_0020, 0x40)
            .function("main", 0x8100_0060, 0x80)
            .build()
    }

    fn host() -> MemoryImageHost {
        let mut host = MemoryImageHost::new();
        host.insert("app", sample_image());
        host
    }

    fn new_process() -> Process {
        let (alloc, mmu) = TestFrameAllocator::new_with_mmu();
        Process::new(mmu, alloc)
    }

    /// Maps a user stack page and lays `returns` out as saved return addresses.
    fn map_stack(process: &mut Process, returns: &[usize]) -> FrameDesc {
        let frame = process.alloc.lock().alloc_frame().unwrap();

        process
            .mmu
            .lock()
            .map_single(va(STACK_PAGE), frame.0, PageSize::_4K, GenericMappingFlags::user_data())
            .unwrap();

        process.trapframe.sp = va(STACK_PAGE);

        for (i, ret) in returns.iter().enumerate() {
            let slot = va(STACK_PAGE) + RETURN_ADDRESS_OFFSET + i * FRAME_STRIDE;
            process.mmu.lock().write_usize(slot, *ret).unwrap();
        }

        frame
    }

    fn unmap_stack(process: &mut Process, frame: FrameDesc) {
        process.mmu.lock().unmap_single(va(STACK_PAGE)).unwrap();
        process.alloc.lock().dealloc(frame);
    }

    #[test]
    fn test_bootstrap_sets_entry_and_symbols() {
        let mut process = new_process();

        process.bootstrap(&host(), &["app"]).unwrap();

        assert_eq!(process.trapframe.epc, va(0x8100_0000));
        assert_eq!(process.symbols().len(), 3);
        assert_eq!(process.image_frames.len(), 2);

        let mut buf = [0u8; 8];
        process.mmu().lock().read_bytes(va(0x8100_2000), &mut buf).unwrap();
        assert_eq!(&buf, b"globals\0");
    }

    #[test]
    fn test_bootstrap_failure_leaves_process_empty() {
        let mut process = new_process();

        assert_eq!(
            process.bootstrap(&host(), &["missing"]),
            Err(BootstrapError::OpenFailed)
        );

        let mut corrupt = sample_image();
        corrupt[1] = b'X';
        let mut host = MemoryImageHost::new();
        host.insert("app", corrupt);

        assert_eq!(
            process.bootstrap(&host, &["app"]),
            Err(BootstrapError::Load(LoadError::NotExecutable))
        );
        assert!(process.image_frames.is_empty());
        assert_eq!(process.trapframe.epc, VirtualAddress::default());
    }

    #[test]
    #[should_panic(expected = "Failed to load the user program")]
    fn test_load_user_program_halts_on_error() {
        let mut process = new_process();

        process.load_user_program(&host(), &[]);
    }

    #[test]
    fn test_heap_calls_go_through_process() {
        let mut process = new_process();
        process.load_user_program(&host(), &["app"]);

        let a = process.allocate(100).unwrap();
        assert_eq!(a, va(USER_FREE_ADDRESS_START + constants::BLOCK_HEADER_SIZE));

        process.release(a).unwrap();
        assert_eq!(process.release(a), Err(HeapError::UnknownAddress(a)));
        assert_eq!(process.heap().free_blocks().count(), 1);
    }

    #[test]
    fn test_backtrace_stops_at_main() {
        let mut process = new_process();
        process.load_user_program(&host(), &["app"]);

        let frame = map_stack(&mut process, &[0x8100_0024, 0x1234, 0x8100_0070, 0x8100_0004]);

        assert_eq!(process.backtrace(10), Ok(2));
        assert_eq!(process.backtrace(1), Ok(1));
        assert_eq!(process.backtrace(0), Ok(0));

        unmap_stack(&mut process, frame);
    }

    #[test]
    fn test_backtrace_depth_is_capped() {
        let mut process = new_process();
        process.load_user_program(&host(), &["app"]);

        let returns = [0x8100_0030; MAX_BACKTRACE_DEPTH + 4];
        let frame = map_stack(&mut process, &returns);

        assert_eq!(process.backtrace(usize::MAX), Ok(MAX_BACKTRACE_DEPTH));

        unmap_stack(&mut process, frame);
    }

    #[test]
    fn test_backtrace_on_unmapped_stack_fails() {
        let mut process = new_process();
        process.load_user_program(&host(), &["app"]);
        process.trapframe.sp = va(0x6000_0000);

        assert_eq!(process.backtrace(4), Err(MMUError::InvalidAddress));
    }

    #[test]
    fn test_drop_returns_every_frame() {
        let alloc = TestFrameAllocator::new();
        let mmu = TestMMU::new(alloc.clone());

        {
            let mut process = Process::new(mmu.clone(), alloc.clone());
            process.load_user_program(&host(), &["app"]);
            process.allocate(64).unwrap();

            assert_eq!(alloc.lock().in_use(), 3);
        }

        assert_eq!(alloc.lock().in_use(), 0);
        assert!(mmu.lock().query_virtual(va(0x8100_0000)).is_err());
    }

    #[test]
    fn test_drop_survives_an_already_unmapped_image_page() {
        let alloc = TestFrameAllocator::new();
        let mmu = TestMMU::new(alloc.clone());

        {
            let mut process = Process::new(mmu.clone(), alloc.clone());
            process.load_user_program(&host(), &["app"]);

            mmu.lock().unmap_single(va(0x8100_0000)).unwrap();
        }

        assert_eq!(alloc.lock().in_use(), 0);
    }
}
