use bytemuck::{Pod, Zeroable};

/// Leading fields of a hosted sparse extent header, up to and including the
/// location of the embedded descriptor. All values are little-endian on disk,
/// use the accessors rather than the raw fields.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SparseHeaderPrefix {
    pub magic: u32,
    pub version: u32,
    pub flags: u32,
    pub capacity: u64,   // sectors, unused here
    pub grain_size: u64, // sectors, unused here
    pub descriptor_offset: u64,
    pub descriptor_size: u64,
}

const _: () = assert!(SparseHeaderPrefix::SIZE == 44);

impl SparseHeaderPrefix {
    /// "KDMV" read as a little-endian u32.
    pub const MAGIC: u32 = 0x564D444B;
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Returns `None` when `buf` is too short to hold the prefix.
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        buf.get(..Self::SIZE)
            .map(bytemuck::pod_read_unaligned::<Self>)
    }

    pub fn magic(&self) -> u32 {
        u32::from_le(self.magic)
    }

    pub fn version(&self) -> u32 {
        u32::from_le(self.version)
    }

    pub fn flags(&self) -> u32 {
        u32::from_le(self.flags)
    }

    pub fn capacity_sectors(&self) -> u64 {
        u64::from_le(self.capacity)
    }

    pub fn grain_size_sectors(&self) -> u64 {
        u64::from_le(self.grain_size)
    }

    pub fn descriptor_offset_sectors(&self) -> u64 {
        u64::from_le(self.descriptor_offset)
    }

    pub fn descriptor_size_sectors(&self) -> u64 {
        u64::from_le(self.descriptor_size)
    }
}
