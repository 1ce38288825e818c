// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Physical and logical disks.
//!
//! A driver publishes a [`PhysicalDisk`] (a block size and the
//! operations to move whole blocks) in the device registry. Disk
//! discovery ([`discover`]) then reads each physical disk's first
//! block and, when it carries a master boot record, registers every
//! used partition as a [`LogicalDisk`]: a window onto the physical
//! disk that clamps accesses to its own range.

use crate::io::device::{self, DeviceRegistry, LOGICAL_DISK, PHYSICAL_DISK};
use crate::println;
use crate::status::{Error, Result};
use alloc::sync::Arc;
use alloc::vec;

/// A block address on a disk.
///
pub type BlockAddr = u32;

/// The operations a physical disk driver provides.
///
pub trait DiskOps: Send + Sync {
    /// Reads `block_count` whole blocks starting at `block_addr`
    /// into `buf`.
    ///
    fn read(&self, buf: &mut [u8], block_addr: BlockAddr, block_count: usize) -> Result<()>;

    /// Writes `block_count` whole blocks starting at `block_addr`
    /// from `buf`.
    ///
    fn write(&self, buf: &[u8], block_addr: BlockAddr, block_count: usize) -> Result<()>;
}

/// A physical block storage device.
///
pub struct PhysicalDisk {
    block_size: usize,
    ops: alloc::boxed::Box<dyn DiskOps>,
}

impl PhysicalDisk {
    /// Returns a disk over the given operations.
    ///
    /// The disk is not published anywhere; drivers normally use
    /// [`register_disk`].
    ///
    pub fn new(block_size: usize, ops: alloc::boxed::Box<dyn DiskOps>) -> PhysicalDisk {
        PhysicalDisk { block_size, ops }
    }

    /// Returns the number of bytes in each block.
    ///
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Reads whole blocks from the device.
    ///
    pub fn read(&self, buf: &mut [u8], block_addr: BlockAddr, block_count: usize) -> Result<()> {
        if buf.len() < block_count * self.block_size {
            return Err(Error::Inval);
        }

        self.ops.read(buf, block_addr, block_count)
    }

    /// Writes whole blocks to the device.
    ///
    pub fn write(&self, buf: &[u8], block_addr: BlockAddr, block_count: usize) -> Result<()> {
        if buf.len() < block_count * self.block_size {
            return Err(Error::Inval);
        }

        self.ops.write(buf, block_addr, block_count)
    }
}

/// A window onto a physical disk: a partition, or the whole disk.
///
pub struct LogicalDisk {
    disk: Arc<PhysicalDisk>,
    start_block: BlockAddr,
    block_count: usize,
}

impl LogicalDisk {
    /// Returns a logical disk spanning `block_count` blocks of
    /// `disk` starting at `start_block`.
    ///
    pub fn new(disk: Arc<PhysicalDisk>, start_block: BlockAddr, block_count: usize) -> Self {
        LogicalDisk {
            disk,
            start_block,
            block_count,
        }
    }

    /// Returns the underlying physical disk.
    ///
    pub fn physical_disk(&self) -> &Arc<PhysicalDisk> {
        &self.disk
    }

    /// Returns the first physical block of the window.
    ///
    pub fn start_block(&self) -> BlockAddr {
        self.start_block
    }

    /// Returns the window's size in blocks.
    ///
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    // Translates a disk-relative block range to an absolute one,
    // clamping it to the window. A start beyond the window yields
    // a zero-length range.
    //
    fn to_abs_block_range(&self, block_addr: BlockAddr, block_count: usize) -> (BlockAddr, usize) {
        if self.block_count as u64 <= block_addr as u64 {
            return (0, 0);
        }

        let first_abs = self.start_block + block_addr;
        let remaining = self.block_count - block_addr as usize;

        (first_abs, block_count.min(remaining))
    }

    /// Reads up to `*block_count` blocks starting at the
    /// window-relative `block_addr`, clamping the transfer to the
    /// window and rewriting `*block_count` to the length served.
    ///
    pub fn read(&self, buf: &mut [u8], block_addr: BlockAddr, block_count: &mut usize) -> Result<()> {
        let (first_abs, clamped) = self.to_abs_block_range(block_addr, *block_count);
        *block_count = clamped;
        if clamped != 0 {
            self.disk.read(&mut buf[..clamped * self.disk.block_size], first_abs, clamped)?;
        }

        Ok(())
    }

    /// Writes up to `*block_count` blocks starting at the
    /// window-relative `block_addr`, clamping the transfer to the
    /// window and rewriting `*block_count` to the length served.
    ///
    pub fn write(&self, buf: &[u8], block_addr: BlockAddr, block_count: &mut usize) -> Result<()> {
        let (first_abs, clamped) = self.to_abs_block_range(block_addr, *block_count);
        *block_count = clamped;
        if clamped != 0 {
            self.disk.write(&buf[..clamped * self.disk.block_size], first_abs, clamped)?;
        }

        Ok(())
    }

    /// Reads exactly `block_count` blocks, failing with
    /// [`Error::Inval`] if the window cannot serve them all.
    ///
    pub fn read_exact(&self, buf: &mut [u8], block_addr: BlockAddr, block_count: usize) -> Result<()> {
        let mut served = block_count;
        self.read(buf, block_addr, &mut served)?;
        if served != block_count {
            return Err(Error::Inval);
        }

        Ok(())
    }

    /// Writes exactly `block_count` blocks, failing with
    /// [`Error::Inval`] if the window cannot serve them all.
    ///
    pub fn write_exact(&self, buf: &[u8], block_addr: BlockAddr, block_count: usize) -> Result<()> {
        let mut served = block_count;
        self.write(buf, block_addr, &mut served)?;
        if served != block_count {
            return Err(Error::Inval);
        }

        Ok(())
    }
}

/// Publishes a physical disk in the kernel's device registry.
///
pub fn register_disk(block_size: usize, ops: alloc::boxed::Box<dyn DiskOps>) -> Arc<PhysicalDisk> {
    let disk = Arc::new(PhysicalDisk::new(block_size, ops));
    device::register(PHYSICAL_DISK, disk.clone());

    disk
}

// One slot of an MBR partition table.
//
struct MbrEntry {
    flags: u8,
    partition_type: u8,
    start_lba: u32,
    sector_count: u32,
}

impl MbrEntry {
    fn parse(bytes: &[u8]) -> MbrEntry {
        MbrEntry {
            flags: bytes[0x0],
            partition_type: bytes[0x4],
            start_lba: u32::from_le_bytes([bytes[0x8], bytes[0x9], bytes[0xa], bytes[0xb]]),
            sector_count: u32::from_le_bytes([bytes[0xc], bytes[0xd], bytes[0xe], bytes[0xf]]),
        }
    }
}

// The block size an MBR is defined against. Other block sizes are
// not yet supported.
const MBR_BLOCK_SIZE: usize = 512;

// Offsets of the four partition entries within the first block.
const MBR_ENTRY_OFFSETS: [usize; 4] = [0x1be, 0x1ce, 0x1de, 0x1ee];

fn parse_mbr(
    registry: &mut DeviceRegistry,
    announce: &device::DeviceHandle,
    disk: &Arc<PhysicalDisk>,
    first_block: &[u8],
) -> bool {
    assert_eq!(MBR_BLOCK_SIZE, disk.block_size());
    if first_block[510] != 0x55 || first_block[511] != 0xaa {
        // No valid MBR.
        return false;
    }

    let entries: alloc::vec::Vec<MbrEntry> = MBR_ENTRY_OFFSETS
        .iter()
        .map(|&offset| MbrEntry::parse(&first_block[offset..offset + 0x10]))
        .collect();

    announce.printf(format_args!("---------- master boot record ----------\n"));
    announce.printf(format_args!("    flags  type  start     sectors\n"));
    for (index, entry) in entries.iter().enumerate() {
        if entry.partition_type == 0x00 {
            continue;
        }
        announce.printf(format_args!(
            "[{}] {:02x}     {:02x}    {:08x}  {}\n",
            index, entry.flags, entry.partition_type, entry.start_lba, entry.sector_count
        ));
    }
    announce.printf(format_args!("----------------------------------------\n"));

    for entry in entries.iter() {
        if entry.partition_type == 0x00 {
            continue;
        }
        let logical = LogicalDisk::new(disk.clone(), entry.start_lba, entry.sector_count as usize);
        registry.register(LOGICAL_DISK, Arc::new(logical));
    }

    true
}

/// Scans a registry's physical disks for partition tables,
/// registering each used partition as a logical disk.
///
pub fn discover_in(registry: &mut DeviceRegistry) {
    let devices = match registry.list_for(PHYSICAL_DISK) {
        Some(devices) if !devices.is_empty() => devices,
        _ => {
            println!("ldisk: no physical disks - aborting");
            return;
        }
    };

    for handle in devices {
        let disk = match handle.data::<PhysicalDisk>() {
            Some(disk) => disk,
            None => continue,
        };

        // Read the first block and look for a partition table in
        // it.
        let mut first_block = vec![0u8; disk.block_size()];
        if let Err(error) = disk.read(&mut first_block, 0, 1) {
            handle.printf(format_args!("failed to read first block (error {})\n", error));
            continue;
        }

        if parse_mbr(registry, &handle, &disk, &first_block) {
            handle.printf(format_args!("MBR loaded\n"));
        } else {
            handle.printf(format_args!(
                "no known partition table found. not reading logical disks.\n"
            ));
        }
    }
}

/// Scans the kernel registry's physical disks for partition
/// tables. See [`discover_in`].
///
pub fn discover() {
    crate::arch::interrupts::without_interrupts(|| {
        discover_in(&mut device::registry().lock())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use spin::Mutex;

    // An in-memory disk.
    struct RamDisk {
        blocks: Mutex<alloc::vec::Vec<u8>>,
    }

    impl RamDisk {
        fn new(block_count: usize) -> Self {
            RamDisk {
                blocks: Mutex::new(vec![0u8; block_count * MBR_BLOCK_SIZE]),
            }
        }
    }

    impl DiskOps for RamDisk {
        fn read(&self, buf: &mut [u8], block_addr: BlockAddr, block_count: usize) -> Result<()> {
            let offset = block_addr as usize * MBR_BLOCK_SIZE;
            let len = block_count * MBR_BLOCK_SIZE;
            let blocks = self.blocks.lock();
            if blocks.len() < offset + len {
                return Err(Error::Io);
            }
            buf[..len].copy_from_slice(&blocks[offset..offset + len]);
            Ok(())
        }

        fn write(&self, buf: &[u8], block_addr: BlockAddr, block_count: usize) -> Result<()> {
            let offset = block_addr as usize * MBR_BLOCK_SIZE;
            let len = block_count * MBR_BLOCK_SIZE;
            let mut blocks = self.blocks.lock();
            if blocks.len() < offset + len {
                return Err(Error::Io);
            }
            blocks[offset..offset + len].copy_from_slice(&buf[..len]);
            Ok(())
        }
    }

    fn write_mbr_entry(block: &mut [u8], slot: usize, ptype: u8, start_lba: u32, sectors: u32) {
        let offset = MBR_ENTRY_OFFSETS[slot];
        block[offset] = 0x80;
        block[offset + 0x4] = ptype;
        block[offset + 0x8..offset + 0xc].copy_from_slice(&start_lba.to_le_bytes());
        block[offset + 0xc..offset + 0x10].copy_from_slice(&sectors.to_le_bytes());
    }

    fn disk_with_mbr() -> Arc<PhysicalDisk> {
        let ram = RamDisk::new(8);
        {
            let mut blocks = ram.blocks.lock();
            // Two used partitions, slots 0 and 2; slot 1 left as
            // type 0x00.
            write_mbr_entry(&mut blocks, 0, 0x83, 2048, 204800);
            write_mbr_entry(&mut blocks, 2, 0x82, 206848, 1024);
            blocks[510] = 0x55;
            blocks[511] = 0xaa;
        }

        Arc::new(PhysicalDisk::new(MBR_BLOCK_SIZE, alloc::boxed::Box::new(ram)))
    }

    #[test]
    fn discovery_registers_used_partitions() {
        let mut registry = DeviceRegistry::new();
        let disk = disk_with_mbr();
        registry.register(PHYSICAL_DISK, disk);

        discover_in(&mut registry);

        let logical = registry.list_for(LOGICAL_DISK).unwrap();
        assert_eq!(logical.len(), 2);

        let first = logical[0].data::<LogicalDisk>().unwrap();
        assert_eq!(first.start_block(), 2048);
        assert_eq!(first.block_count(), 204800);

        let second = logical[1].data::<LogicalDisk>().unwrap();
        assert_eq!(second.start_block(), 206848);
        assert_eq!(second.block_count(), 1024);
    }

    #[test]
    fn discovery_skips_disks_without_signature() {
        let mut registry = DeviceRegistry::new();
        let ram = RamDisk::new(4);
        registry.register(
            PHYSICAL_DISK,
            Arc::new(PhysicalDisk::new(MBR_BLOCK_SIZE, alloc::boxed::Box::new(ram))),
        );

        discover_in(&mut registry);
        assert!(registry.list_for(LOGICAL_DISK).is_none());
    }

    #[test]
    fn logical_disk_clamps_to_its_window() {
        let ram = RamDisk::new(8);
        {
            let mut blocks = ram.blocks.lock();
            for block in 0..8usize {
                blocks[block * MBR_BLOCK_SIZE] = block as u8;
            }
        }
        let disk = Arc::new(PhysicalDisk::new(MBR_BLOCK_SIZE, alloc::boxed::Box::new(ram)));

        // A 3-block window starting at physical block 2.
        let logical = LogicalDisk::new(disk, 2, 3);
        let mut buf = vec![0u8; 4 * MBR_BLOCK_SIZE];

        // A read inside the window maps to the physical offset.
        let mut count = 2;
        logical.read(&mut buf, 1, &mut count).unwrap();
        assert_eq!(count, 2);
        assert_eq!(buf[0], 3);
        assert_eq!(buf[MBR_BLOCK_SIZE], 4);

        // A read crossing the window end is clamped.
        let mut count = 4;
        logical.read(&mut buf, 1, &mut count).unwrap();
        assert_eq!(count, 2);

        // A read starting past the window serves nothing.
        let mut count = 1;
        logical.read(&mut buf, 7, &mut count).unwrap();
        assert_eq!(count, 0);

        // The exact variants refuse shrunk transfers.
        assert_eq!(logical.read_exact(&mut buf, 1, 4), Err(Error::Inval));
        logical.read_exact(&mut buf, 0, 3).unwrap();

        // Writes round-trip through the window offset.
        let data = vec![0xee; MBR_BLOCK_SIZE];
        logical.write_exact(&data, 0, 1).unwrap();
        let mut back = vec![0u8; MBR_BLOCK_SIZE];
        logical.read_exact(&mut back, 0, 1).unwrap();
        assert_eq!(back[0], 0xee);
        assert_eq!(logical.write_exact(&data, 2, 2), Err(Error::Inval));
    }
}
