//! File-backed shared-memory region.
//!
//! A [`SharedRegion`] maps a file read-write so that cooperating processes
//! can address the same physical bytes. Plain accessors carry no ordering
//! guarantees; the volatile accessors are release-stores and acquire-loads
//! and are the only synchronizing operations the transport ever performs.
//!
//! All multi-byte values are little-endian in the file, so participants on
//! big-endian hosts interoperate with little-endian ones.

use memmap2::MmapMut;
use std::{
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    ptr,
    sync::atomic::{AtomicI32, AtomicI64, Ordering},
};

/// Largest mappable region. Sizes at or above 2^62 bytes are rejected
/// before touching the file system.
pub const MAX_REGION_SIZE: u64 = 1 << 62;

/// A writable byte region backed by a memory-mapped file.
///
/// Creating a region creates the file (and its parent directories) if
/// needed and extends it to the requested size. Attaching to an existing
/// file of the same size maps the same physical pages, which is how two
/// processes end up sharing memory. Each participant owns its own
/// `SharedRegion`; the value is never shared between threads.
pub struct SharedRegion {
    _file: File,
    _mmap: MmapMut,
    base: *mut u8,
    len: usize,
    path: PathBuf,
}

impl std::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegion")
            .field("len", &self.len)
            .field("path", &self.path)
            .finish()
    }
}

// One participant owns the region and may move it across threads. The
// mapping itself stays put when the struct moves.
unsafe impl Send for SharedRegion {}

impl SharedRegion {
    /// Creates the backing file if absent, extends it to `size` bytes if
    /// its length differs, and maps it read-write.
    pub fn open<P: AsRef<Path>>(path: P, size: u64) -> io::Result<Self> {
        if size >= MAX_REGION_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("region size not supported: {size} (max {MAX_REGION_SIZE})"),
            ));
        }

        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;
        if file.metadata()?.len() != size {
            file.set_len(size)?;
        }

        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        let base = mmap.as_mut_ptr();

        Ok(Self {
            _file: file,
            _mmap: mmap,
            base,
            len: size as usize,
            path,
        })
    }

    /// Length of the mapping in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stable base address, valid until the region is released.
    #[inline]
    pub fn base_ptr(&self) -> *mut u8 {
        self.base
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unmaps the region and optionally deletes the backing file. A file
    /// already deleted by the peer is not an error.
    pub fn release(self, delete_file: bool) -> io::Result<()> {
        let path = self.path.clone();
        drop(self);
        if delete_file {
            match fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e),
            }
        } else {
            Ok(())
        }
    }

    #[inline]
    fn addr(&self, offset: usize, bytes: usize) -> *mut u8 {
        debug_assert!(
            offset + bytes <= self.len,
            "out of bounds: offset={offset} bytes={bytes} len={}",
            self.len
        );
        unsafe { self.base.add(offset) }
    }

    // ─── Plain accessors (no ordering guarantees) ───────────────────────

    #[inline]
    pub fn put_byte(&self, offset: usize, value: u8) {
        unsafe { ptr::write(self.addr(offset, 1), value) }
    }

    #[inline]
    pub fn get_byte(&self, offset: usize) -> u8 {
        unsafe { ptr::read(self.addr(offset, 1)) }
    }

    #[inline]
    pub fn put_short(&self, offset: usize, value: i16) {
        unsafe { ptr::write_unaligned(self.addr(offset, 2) as *mut i16, value.to_le()) }
    }

    #[inline]
    pub fn get_short(&self, offset: usize) -> i16 {
        i16::from_le(unsafe { ptr::read_unaligned(self.addr(offset, 2) as *const i16) })
    }

    #[inline]
    pub fn put_int(&self, offset: usize, value: i32) {
        unsafe { ptr::write_unaligned(self.addr(offset, 4) as *mut i32, value.to_le()) }
    }

    #[inline]
    pub fn get_int(&self, offset: usize) -> i32 {
        i32::from_le(unsafe { ptr::read_unaligned(self.addr(offset, 4) as *const i32) })
    }

    #[inline]
    pub fn put_long(&self, offset: usize, value: i64) {
        unsafe { ptr::write_unaligned(self.addr(offset, 8) as *mut i64, value.to_le()) }
    }

    #[inline]
    pub fn get_long(&self, offset: usize) -> i64 {
        i64::from_le(unsafe { ptr::read_unaligned(self.addr(offset, 8) as *const i64) })
    }

    /// Copies `src` into the region at `offset`.
    #[inline]
    pub fn put_bytes(&self, offset: usize, src: &[u8]) {
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), self.addr(offset, src.len()), src.len()) }
    }

    /// Copies `dst.len()` bytes out of the region at `offset`.
    #[inline]
    pub fn get_bytes(&self, offset: usize, dst: &mut [u8]) {
        unsafe { ptr::copy_nonoverlapping(self.addr(offset, dst.len()), dst.as_mut_ptr(), dst.len()) }
    }

    /// Borrowed view of `len` bytes at `offset`. The view is plain memory:
    /// a concurrent writer can change it under the reader, which is exactly
    /// the race the ring protocol's checksum exists to detect.
    #[inline]
    pub fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.addr(offset, len), len) }
    }

    // ─── Volatile accessors (release-store / acquire-load) ──────────────

    #[inline]
    pub fn put_int_volatile(&self, offset: usize, value: i32) {
        debug_assert!(offset % 4 == 0, "unaligned volatile int at {offset}");
        let cell = unsafe { &*(self.addr(offset, 4) as *const AtomicI32) };
        cell.store(value.to_le(), Ordering::Release);
    }

    #[inline]
    pub fn get_int_volatile(&self, offset: usize) -> i32 {
        debug_assert!(offset % 4 == 0, "unaligned volatile int at {offset}");
        let cell = unsafe { &*(self.addr(offset, 4) as *const AtomicI32) };
        i32::from_le(cell.load(Ordering::Acquire))
    }

    #[inline]
    pub fn put_long_volatile(&self, offset: usize, value: i64) {
        debug_assert!(offset % 8 == 0, "unaligned volatile long at {offset}");
        let cell = unsafe { &*(self.addr(offset, 8) as *const AtomicI64) };
        cell.store(value.to_le(), Ordering::Release);
    }

    #[inline]
    pub fn get_long_volatile(&self, offset: usize) -> i64 {
        debug_assert!(offset % 8 == 0, "unaligned volatile long at {offset}");
        let cell = unsafe { &*(self.addr(offset, 8) as *const AtomicI64) };
        i64::from_le(cell.load(Ordering::Acquire))
    }
}

/// A value that can encode and decode itself at a region offset.
///
/// Implementations use the region's plain accessors only; whoever owns
/// the region provides ordering (the ring transport does so through its
/// sequence-number protocol). The maximum encoded size of a type is
/// fixed for the lifetime of a ring and is supplied to the ring
/// constructors (most types expose it as a constant).
///
/// Instances are mutable and reused: producers fill pooled instances
/// that get serialized on flush, and each consumer decodes every slot
/// into the single instance it owns.
pub trait MemorySerializable {
    /// Writes this value at `offset`, returning the encoded size in bytes.
    fn write_to(&self, region: &SharedRegion, offset: usize) -> usize;

    /// Reads this value from `offset`, returning the decoded size in bytes.
    fn read_from(&mut self, region: &SharedRegion, offset: usize) -> usize;
}
