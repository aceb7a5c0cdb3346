//! Shared holding-register store.
//!
//! [`RegisterStore`] is the single bank of 65 536 `u16` holding registers
//! read by the Modbus front-end and written by pipeline runs. It is meant
//! to be shared as `Arc<RegisterStore>`.
//!
//! Individual reads and writes take a short `RwLock`. A pipeline run
//! additionally holds a [`BlockLease`] on its base address for its whole
//! lifetime, so two runs on the same base never interleave their
//! status/error/result writes. Leases on the same base are granted in
//! FIFO order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::OwnedMutexGuard;

use crate::error::CoreError;
use crate::run::{RunErrorCode, RunStatus, BLOCK_LEN, ERROR_OFFSET, RESULT_OFFSET, STATUS_OFFSET};
use crate::types::RegisterAddress;

/// Number of addressable holding registers.
pub const REGISTER_COUNT: usize = 1 << 16;

/// Highest base address whose run block still fits in the address space.
pub const MAX_BLOCK_BASE: RegisterAddress = (REGISTER_COUNT - BLOCK_LEN as usize) as RegisterAddress;

pub struct RegisterStore {
    values: RwLock<Vec<u16>>,
    /// One lease mutex per base address ever triggered. Never shrinks; the
    /// address space bounds it.
    leases: Mutex<HashMap<RegisterAddress, Arc<tokio::sync::Mutex<()>>>>,
}

impl RegisterStore {
    /// Create a store with every register set to zero.
    pub fn new() -> Self {
        Self {
            values: RwLock::new(vec![0; REGISTER_COUNT]),
            leases: Mutex::new(HashMap::new()),
        }
    }

    pub fn read(&self, address: RegisterAddress) -> u16 {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        values[address as usize]
    }

    pub fn write(&self, address: RegisterAddress, value: u16) {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values[address as usize] = value;
    }

    /// Read `count` consecutive registers starting at `start`.
    pub fn read_range(&self, start: RegisterAddress, count: usize) -> Result<Vec<u16>, CoreError> {
        let range = Self::checked_range(start, count)?;
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        Ok(values[range].to_vec())
    }

    /// Write `data` into consecutive registers starting at `start`.
    ///
    /// Either the whole slice is written or nothing is.
    pub fn write_range(&self, start: RegisterAddress, data: &[u16]) -> Result<(), CoreError> {
        let range = Self::checked_range(start, data.len())?;
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values[range].copy_from_slice(data);
        Ok(())
    }

    /// Read the `(status, error, result)` block at `base`.
    pub fn block(&self, base: RegisterAddress) -> Result<[u16; 3], CoreError> {
        let range = Self::checked_block(base)?;
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        Ok([values[range.start], values[range.start + 1], values[range.start + 2]])
    }

    /// Acquire exclusive use of the run block at `base`.
    ///
    /// Waits while another lease on the same base is alive. Fails
    /// immediately if the block would run past the end of the address
    /// space.
    pub async fn lease(self: &Arc<Self>, base: RegisterAddress) -> Result<BlockLease, CoreError> {
        Self::checked_block(base)?;

        let mutex = {
            let mut leases = self.leases.lock().unwrap_or_else(PoisonError::into_inner);
            leases.entry(base).or_default().clone()
        };
        let guard = mutex.lock_owned().await;

        Ok(BlockLease {
            store: Arc::clone(self),
            base,
            _guard: guard,
        })
    }

    fn checked_range(start: RegisterAddress, count: usize) -> Result<std::ops::Range<usize>, CoreError> {
        let begin = start as usize;
        match begin.checked_add(count) {
            Some(end) if end <= REGISTER_COUNT => Ok(begin..end),
            _ => Err(CoreError::AddressOutOfRange { start, count }),
        }
    }

    fn checked_block(base: RegisterAddress) -> Result<std::ops::Range<usize>, CoreError> {
        if base > MAX_BLOCK_BASE {
            return Err(CoreError::BlockOutOfRange(base));
        }
        let begin = base as usize;
        Ok(begin..begin + BLOCK_LEN as usize)
    }
}

impl Default for RegisterStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive ownership of one run block. Released on drop.
pub struct BlockLease {
    store: Arc<RegisterStore>,
    base: RegisterAddress,
    _guard: OwnedMutexGuard<()>,
}

impl std::fmt::Debug for BlockLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockLease").field("base", &self.base).finish_non_exhaustive()
    }
}

impl BlockLease {
    /// Zero status, error code and result.
    pub fn reset(&self) {
        // checked_block in lease() guarantees the block fits.
        let _ = self.store.write_range(self.base, &[0, 0, 0]);
    }

    pub fn set_status(&self, status: RunStatus) {
        self.store.write(self.base + STATUS_OFFSET, status.as_register());
    }

    pub fn set_error(&self, error: RunErrorCode) {
        self.store.write(self.base + ERROR_OFFSET, error.as_register());
    }

    pub fn set_result(&self, value: u16) {
        self.store.write(self.base + RESULT_OFFSET, value);
    }

    /// Current `(status, error, result)` of this block.
    pub fn snapshot(&self) -> [u16; 3] {
        // checked_block in lease() guarantees the block fits.
        self.store.block(self.base).unwrap_or_default()
    }
}
