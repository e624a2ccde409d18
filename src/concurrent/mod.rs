//! Lock-free primitives shared between the driver's agents and the client
//! processes mapping the same files.

pub mod broadcast;
pub mod queue;
pub mod ringbuffer;

use std::mem::size_of;
use std::ops::{Deref, DerefMut};
use std::ptr::{read_volatile, write_volatile};
use std::slice;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};

use memmap::MmapMut;

use crate::util::{BufferError, IndexT, Result};

fn bounds_check_slice(slice: &[u8], offset: IndexT, size: IndexT) -> Result<()> {
    if offset < 0 || size < 0 || slice.len() as IndexT - offset < size {
        Err(BufferError::OutOfBounds)
    } else {
        Ok(())
    }
}

/// Atomic operations on slices of memory
pub trait AtomicBuffer: Deref<Target = [u8]> + DerefMut<Target = [u8]> {
    /// Check that there are at least `size` bytes of memory available
    /// beginning at some offset.
    ///
    /// ```rust
    /// # use rivulet_driver::concurrent::AtomicBuffer;
    ///
    /// let buffer = &mut [0u8; 8][..];
    /// assert!(buffer.bounds_check(0, 8).is_ok());
    /// assert!(buffer.bounds_check(1, 7).is_ok());
    /// assert!(buffer.bounds_check(1, 8).is_err());
    /// assert!(buffer.bounds_check(-1, 8).is_err());
    /// ```
    fn bounds_check(&self, offset: IndexT, size: IndexT) -> Result<()> {
        bounds_check_slice(self.deref(), offset, size)
    }

    /// Overlay a struct on a buffer.
    ///
    /// NOTE: Has the potential to cause undefined behavior if alignment is incorrect.
    fn overlay<T>(&self, offset: IndexT) -> Result<&T>
    where
        T: Sized,
    {
        self.bounds_check(offset, size_of::<T>() as IndexT)
            .map(|_| {
                let offset_ptr = unsafe { self.as_ptr().offset(offset as isize) };
                unsafe { &*(offset_ptr as *const T) }
            })
    }

    /// Overlay a mutable value on the buffer.
    ///
    /// NOTE: Has the potential to cause undefined behavior if alignment is incorrect
    fn overlay_mut<T>(&mut self, offset: IndexT) -> Result<&mut T>
    where
        T: Sized,
    {
        self.bounds_check(offset, size_of::<T>() as IndexT)
            .map(|_| {
                let offset_ptr = unsafe { self.as_mut_ptr().offset(offset as isize) };
                unsafe { &mut *(offset_ptr as *mut T) }
            })
    }

    /// Overlay a struct on a buffer, and perform a volatile read
    ///
    /// ```rust
    /// # use rivulet_driver::concurrent::AtomicBuffer;
    /// let buffer = &mut [5, 0, 0, 0][..];
    ///
    /// let my_val: u32 = buffer.overlay_volatile::<u32>(0).unwrap();
    /// assert_eq!(my_val, 5);
    /// ```
    fn overlay_volatile<T>(&self, offset: IndexT) -> Result<T>
    where
        T: Copy,
    {
        self.bounds_check(offset, size_of::<T>() as IndexT)
            .map(|_| {
                let offset_ptr = unsafe { self.as_ptr().offset(offset as isize) };
                unsafe { read_volatile(offset_ptr as *const T) }
            })
    }

    /// Perform a volatile write of a value over a buffer
    ///
    /// ```rust
    /// # use rivulet_driver::concurrent::AtomicBuffer;
    /// let mut buffer = &mut [0, 0, 0, 0][..];
    ///
    /// let value: u32 = 24;
    /// buffer.write_volatile(0, value).unwrap();
    /// assert_eq!(buffer, [24, 0, 0, 0]);
    /// ```
    fn write_volatile<T>(&mut self, offset: IndexT, val: T) -> Result<()>
    where
        T: Copy,
    {
        self.bounds_check(offset, size_of::<T>() as IndexT)
            .map(|_| {
                let offset_ptr = unsafe { self.as_mut_ptr().offset(offset as isize) };
                unsafe { write_volatile(offset_ptr as *mut T, val) };
            })
    }

    /// Perform an atomic fetch and add of a 64-bit value
    ///
    /// ```rust
    /// # use rivulet_driver::concurrent::AtomicBuffer;
    /// let mut buf = vec![0u8; 8];
    /// assert_eq!(buf.get_and_add_i64(0, 1), Ok(0));
    /// assert_eq!(buf.get_and_add_i64(0, 1), Ok(1));
    /// ```
    fn get_and_add_i64(&self, offset: IndexT, value: i64) -> Result<i64> {
        self.overlay::<AtomicI64>(offset)
            .map(|a| a.fetch_add(value, Ordering::SeqCst))
    }

    /// Perform an atomic Compare-And-Swap of a 64-bit value. Returns `Ok(true)`
    /// if the update was successful, and `Ok(false)` if the update failed.
    ///
    /// ```rust
    /// # use rivulet_driver::concurrent::AtomicBuffer;
    /// let mut buf = &mut [0u8; 8][..];
    /// buf.get_and_add_i64(0, 1).unwrap();
    ///
    /// assert_eq!(buf.compare_and_set_i64(0, 0, 1), Ok(false));
    /// assert_eq!(buf.compare_and_set_i64(0, 1, 2), Ok(true));
    /// assert_eq!(buf.get_i64_volatile(0), Ok(2));
    /// ```
    fn compare_and_set_i64(&self, offset: IndexT, expected: i64, update: i64) -> Result<bool> {
        self.overlay::<AtomicI64>(offset).map(|a| {
            a.compare_exchange(expected, update, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        })
    }

    /// Perform an atomic Compare-And-Swap of a 32-bit value. Returns `Ok(true)`
    /// if the update was successful, and `Ok(false)` if the update failed.
    fn compare_and_set_i32(&self, offset: IndexT, expected: i32, update: i32) -> Result<bool> {
        self.overlay::<AtomicI32>(offset).map(|a| {
            a.compare_exchange(expected, update, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        })
    }

    /// Perform a volatile read of an `i64` value
    ///
    /// ```rust
    /// # use rivulet_driver::concurrent::AtomicBuffer;
    /// let buffer = vec![12u8, 0, 0, 0, 0, 0, 0, 0];
    /// assert_eq!(buffer.get_i64_volatile(0), Ok(12));
    /// ```
    fn get_i64_volatile(&self, offset: IndexT) -> Result<i64> {
        self.overlay_volatile::<i64>(offset)
    }

    /// Read an `i64` value from the buffer without performing any synchronization
    fn get_i64(&self, offset: IndexT) -> Result<i64> {
        self.overlay::<i64>(offset).map(|i| *i)
    }

    /// Perform a volatile write of an `i64` value
    ///
    /// ```rust
    /// # use rivulet_driver::concurrent::AtomicBuffer;
    /// let mut buffer = vec![0u8; 8];
    /// buffer.put_i64_ordered(0, 12);
    /// assert_eq!(buffer.get_i64_volatile(0), Ok(12));
    /// ```
    fn put_i64_ordered(&mut self, offset: IndexT, value: i64) -> Result<()> {
        self.write_volatile::<i64>(offset, value)
    }

    /// Write an `i64` value into the buffer without performing any synchronization
    fn put_i64(&mut self, offset: IndexT, value: i64) -> Result<()> {
        self.overlay_mut::<i64>(offset).map(|i| *i = value)
    }

    /// Write the contents of a byte slice to this buffer. Does not perform any synchronization
    fn put_slice(
        &mut self,
        index: IndexT,
        source: &[u8],
        source_index: IndexT,
        len: IndexT,
    ) -> Result<()> {
        self.bounds_check(index, len)?;
        bounds_check_slice(source, source_index, len)?;

        let index = index as usize;
        let source_index = source_index as usize;
        let len = len as usize;

        self[index..index + len].copy_from_slice(&source[source_index..source_index + len]);
        Ok(())
    }

    /// Write the contents of one buffer to another. Does not perform any synchronization
    fn put_bytes<B>(
        &mut self,
        index: IndexT,
        source: &B,
        source_index: IndexT,
        len: IndexT,
    ) -> Result<()>
    where
        B: AtomicBuffer,
    {
        self.bounds_check(index, len)?;
        source.bounds_check(source_index, len)?;

        let index = index as usize;
        let source_index = source_index as usize;
        let len = len as usize;

        self[index..index + len].copy_from_slice(&source[source_index..source_index + len]);
        Ok(())
    }

    /// Repeatedly write a value into an atomic buffer. Guaranteed to use `memset`.
    fn set_memory(&mut self, offset: IndexT, length: usize, value: u8) -> Result<()> {
        self.bounds_check(offset, length as IndexT).map(|_| unsafe {
            self.as_mut_ptr()
                .offset(offset as isize)
                .write_bytes(value, length)
        })
    }

    /// Perform a volatile read of an `i32` from the buffer
    ///
    /// ```rust
    /// # use rivulet_driver::concurrent::AtomicBuffer;
    /// let buffer = vec![0, 12, 0, 0, 0];
    /// assert_eq!(buffer.get_i32_volatile(1), Ok(12));
    /// ```
    fn get_i32_volatile(&self, offset: IndexT) -> Result<i32> {
        self.overlay_volatile::<i32>(offset)
    }

    /// Read an `i32` value from the buffer without performing any synchronization
    fn get_i32(&self, offset: IndexT) -> Result<i32> {
        self.overlay::<i32>(offset).map(|i| *i)
    }

    /// Perform a volatile write of an `i32` into the buffer
    ///
    /// ```rust
    /// # use rivulet_driver::concurrent::AtomicBuffer;
    /// let mut bytes = vec![0u8; 4];
    /// bytes.put_i32_ordered(0, 12);
    /// assert_eq!(bytes.get_i32_volatile(0), Ok(12));
    /// ```
    fn put_i32_ordered(&mut self, offset: IndexT, value: i32) -> Result<()> {
        self.write_volatile::<i32>(offset, value)
    }

    /// Write an `i32` value into the buffer without performing any synchronization
    fn put_i32(&mut self, offset: IndexT, value: i32) -> Result<()> {
        self.overlay_mut::<i32>(offset).map(|i| *i = value)
    }

    /// Perform an acquire-load of an `i32` from the buffer. Pairs with
    /// [`put_i32_release`](AtomicBuffer::put_i32_release): a reader observing
    /// the released value also observes every write sequenced before it.
    fn get_i32_acquire(&self, offset: IndexT) -> Result<i32> {
        self.overlay::<AtomicI32>(offset)
            .map(|a| a.load(Ordering::Acquire))
    }

    /// Perform a release-store of an `i32` into the buffer.
    ///
    /// ```rust
    /// # use rivulet_driver::concurrent::AtomicBuffer;
    /// let mut bytes = vec![0u8; 4];
    /// bytes.put_i32_release(0, 1);
    /// assert_eq!(bytes.get_i32_acquire(0), Ok(1));
    /// ```
    fn put_i32_release(&mut self, offset: IndexT, value: i32) -> Result<()> {
        self.overlay::<AtomicI32>(offset)
            .map(|a| a.store(value, Ordering::Release))
    }

    /// Read a length-prefixed UTF-8 string from the buffer
    ///
    /// ```rust
    /// # use rivulet_driver::concurrent::AtomicBuffer;
    /// let mut buffer = vec![0u8; 16];
    /// buffer.put_string(0, "driver").unwrap();
    /// assert_eq!(buffer.get_string(0), Ok("driver".to_string()));
    /// ```
    fn get_string(&self, offset: IndexT) -> Result<String> {
        let length = self.get_i32(offset)?;
        self.bounds_check(offset + 4, length)?;
        let start = (offset + 4) as usize;
        let bytes = &self[start..start + length as usize];
        String::from_utf8(bytes.to_vec()).map_err(|_| BufferError::IllegalArgument)
    }

    /// Write a length-prefixed UTF-8 string into the buffer, returning the
    /// total number of bytes consumed
    fn put_string(&mut self, offset: IndexT, value: &str) -> Result<IndexT> {
        let length = value.len() as IndexT;
        self.put_i32(offset, length)?;
        self.put_slice(offset + 4, value.as_bytes(), 0, length)?;
        Ok(4 + length)
    }

    /// Return the total number of bytes in this buffer
    fn capacity(&self) -> IndexT {
        self.len() as IndexT
    }
}

impl AtomicBuffer for Vec<u8> {}

impl AtomicBuffer for &mut [u8] {}

impl AtomicBuffer for MmapMut {}

/// Unowned view over a region of mapped memory.
///
/// The driver maps each of its files once and carves the mapping into region
/// views handed to the components that operate on them. A view is a trivially
/// copyable handle: it does NOT keep the backing mapping alive. The mapping
/// owner (the concluded context) must outlive every view carved from it, and
/// cross-thread use must go through the volatile/atomic accessors only.
#[derive(Debug, Clone, Copy)]
pub struct RawBuffer {
    ptr: *mut u8,
    len: usize,
}

// Views are moved between agent threads during driver assembly; the accessor
// discipline above governs actual concurrent access.
unsafe impl Send for RawBuffer {}
unsafe impl Sync for RawBuffer {}

impl RawBuffer {
    /// Create a view over `len` bytes starting at `ptr`.
    ///
    /// Callers guarantee the memory stays mapped for the view's lifetime and
    /// that `ptr` is valid for reads and writes of `len` bytes.
    pub unsafe fn new(ptr: *mut u8, len: usize) -> Self {
        RawBuffer { ptr, len }
    }

    /// Create a sub-view of this view. Panics if the range is out of bounds.
    pub fn view(&self, offset: usize, len: usize) -> RawBuffer {
        assert!(offset + len <= self.len);
        RawBuffer {
            ptr: unsafe { self.ptr.add(offset) },
            len,
        }
    }
}

impl Deref for RawBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        unsafe { slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl DerefMut for RawBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl AtomicBuffer for RawBuffer {}
