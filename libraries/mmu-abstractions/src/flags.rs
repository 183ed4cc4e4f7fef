bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GenericMappingFlags: usize {
        const Readable = 1 << 0;
        const Writable = 1 << 1;
        const Executable = 1 << 2;
        const User = 1 << 3;
        const Kernel = 1 << 4;
    }
}

impl GenericMappingFlags {
    /// Plain read/write user data, as used for heap pages.
    pub const fn user_data() -> Self {
        GenericMappingFlags::User
            .union(GenericMappingFlags::Readable)
            .union(GenericMappingFlags::Writable)
    }
}
