//! Shared data store blocks
//!
//! A block is either single or double buffered. Writers fill the buffer behind
//! the write handle; a double buffered block then swaps its write and read
//! handles so readers always copy a complete snapshot. Handles and copies are
//! only touched under the block lock. Task context only.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BlockId(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Buffering {
    Single,
    Double,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataError {
    UnknownBlock,
    /// Source or destination does not match the block length.
    LengthMismatch { expected: usize, actual: usize },
}

/// Block exchange with the data store.
pub trait DataStore {
    fn store(&self, block: BlockId, data: &[u8]) -> Result<(), DataError>;

    fn request(&self, block: BlockId, destination: &mut [u8]) -> Result<(), DataError>;
}

/// Ticks to wait for the data store queue, never less than one.
pub fn queue_timeout_ticks(timeout_ms: u32, tick_rate_hz: u32) -> u32 {
    let ticks = (timeout_ms as u64 * tick_rate_hz as u64 / 1000) as u32;
    ticks.max(1)
}

struct Buffers<const LEN: usize> {
    data: [[u8; LEN]; 2],
    write: usize,
    read: usize,
}

pub struct DataBlock<const LEN: usize> {
    buffering: Buffering,
    buffers: Mutex<CriticalSectionRawMutex, RefCell<Buffers<LEN>>>,
}

impl<const LEN: usize> DataBlock<LEN> {
    pub const fn new(buffering: Buffering) -> Self {
        let read = match buffering {
            Buffering::Single => 0,
            Buffering::Double => 1,
        };
        DataBlock {
            buffering,
            buffers: Mutex::new(RefCell::new(Buffers {
                data: [[0; LEN]; 2],
                write: 0,
                read,
            })),
        }
    }

    pub fn buffering(&self) -> Buffering {
        self.buffering
    }
}

/// Type-erased access to a [`DataBlock`].
pub trait BlockAccess {
    fn length(&self) -> usize;

    fn write(&self, data: &[u8]) -> Result<(), DataError>;

    fn read(&self, destination: &mut [u8]) -> Result<(), DataError>;
}

fn check_len(expected: usize, actual: usize) -> Result<(), DataError> {
    if expected != actual {
        return Err(DataError::LengthMismatch { expected, actual });
    }
    Ok(())
}

impl<const LEN: usize> BlockAccess for DataBlock<LEN> {
    fn length(&self) -> usize {
        LEN
    }

    fn write(&self, data: &[u8]) -> Result<(), DataError> {
        check_len(LEN, data.len())?;
        self.buffers.lock(|buffers| {
            let mut buffers = buffers.borrow_mut();
            let write = buffers.write;
            buffers.data[write].copy_from_slice(data);
            if self.buffering == Buffering::Double {
                buffers.write = buffers.read;
                buffers.read = write;
            }
        });
        Ok(())
    }

    fn read(&self, destination: &mut [u8]) -> Result<(), DataError> {
        check_len(LEN, destination.len())?;
        self.buffers.lock(|buffers| {
            let buffers = buffers.borrow();
            destination.copy_from_slice(&buffers.data[buffers.read]);
        });
        Ok(())
    }
}

/// Block table indexed by [`BlockId`].
pub struct Database<'a> {
    blocks: &'a [&'a dyn BlockAccess],
}

impl<'a> Database<'a> {
    pub const fn new(blocks: &'a [&'a dyn BlockAccess]) -> Self {
        Database { blocks }
    }

    fn block(&self, id: BlockId) -> Result<&'a dyn BlockAccess, DataError> {
        self.blocks.get(id.0 as usize).copied().ok_or(DataError::UnknownBlock)
    }
}

impl DataStore for Database<'_> {
    fn store(&self, block: BlockId, data: &[u8]) -> Result<(), DataError> {
        self.block(block)?.write(data)
    }

    fn request(&self, block: BlockId, destination: &mut [u8]) -> Result<(), DataError> {
        self.block(block)?.read(destination)
    }
}
