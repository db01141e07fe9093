use std::ffi::c_void;
use std::marker::PhantomData;

use crate::constants::{DbtFlags, ENOMEM};
use crate::error::{Error, Misuse, Result};
use crate::native::{Dbt, NativeAllocator};

fn checked_len(data: &[u8]) -> Result<u32> {
    if data.is_empty() {
        return Err(Misuse::EmptyBuffer.into());
    }
    u32::try_from(data.len()).map_err(|_| Misuse::BufferTooLarge.into())
}

/// Read-only descriptor borrowing caller bytes for one native call.
#[derive(Debug)]
pub struct InputValue<'a> {
    dbt: Dbt,
    _data: PhantomData<&'a [u8]>,
}

impl<'a> InputValue<'a> {
    /// Fails with `EmptyBuffer` for an empty slice, which has no base address
    /// the store can use.
    pub fn new(data: &'a [u8]) -> Result<Self> {
        let size = checked_len(data)?;
        Ok(InputValue {
            dbt: Dbt {
                data: data.as_ptr() as *mut c_void,
                size,
                flags: DbtFlags::READONLY,
            },
            _data: PhantomData,
        })
    }

    pub fn as_dbt(&self) -> &Dbt {
        &self.dbt
    }

    pub fn len(&self) -> usize {
        self.dbt.size as usize
    }

    pub fn is_empty(&self) -> bool {
        self.dbt.size == 0
    }
}

/// Descriptor the store fills with memory from its own allocator.
///
/// Whatever the store left in the descriptor is freed exactly once when the
/// value is dropped, so early returns on error paths never leak it.
pub struct OutputValue<'a> {
    dbt: Dbt,
    allocator: &'a dyn NativeAllocator,
}

impl<'a> OutputValue<'a> {
    pub fn new(allocator: &'a dyn NativeAllocator) -> Self {
        OutputValue {
            dbt: Dbt::empty(DbtFlags::REALLOC),
            allocator,
        }
    }

    /// Starts from a store-allocated copy of `data`, for calls that read a
    /// key from the descriptor and write the found key back into it.
    pub fn seeded(allocator: &'a dyn NativeAllocator, data: &[u8]) -> Result<Self> {
        let size = checked_len(data)?;
        let mut value = OutputValue::new(allocator);
        // SAFETY: a null pointer requests a fresh block of `size` bytes.
        let ptr = unsafe { allocator.realloc(std::ptr::null_mut(), data.len()) };
        if ptr.is_null() {
            return Err(Error::from(ENOMEM));
        }
        // SAFETY: `ptr` holds at least `size` writable bytes.
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr as *mut u8, data.len()) };
        value.dbt.data = ptr;
        value.dbt.size = size;
        Ok(value)
    }

    pub fn as_dbt_mut(&mut self) -> &mut Dbt {
        &mut self.dbt
    }

    /// Copies the current region into an independently owned vector.
    pub fn to_vec(&self) -> Vec<u8> {
        // SAFETY: the store either left `data` null or pointed it at `size`
        // bytes it allocated for this descriptor.
        unsafe { self.dbt.as_slice() }.to_vec()
    }

    /// Copies the region out, then releases it.
    pub fn into_owned(self) -> Vec<u8> {
        self.to_vec()
    }
}

impl Drop for OutputValue<'_> {
    fn drop(&mut self) {
        if self.dbt.data.is_null() || !self.dbt.flags.contains(DbtFlags::REALLOC) {
            return;
        }
        // SAFETY: REALLOC descriptors only ever hold memory from `allocator`.
        unsafe { self.allocator.free(self.dbt.data) };
        self.dbt.data = std::ptr::null_mut();
        self.dbt.size = 0;
    }
}
