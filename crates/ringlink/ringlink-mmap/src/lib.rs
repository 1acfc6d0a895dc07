use memmap2::{MmapMut, MmapOptions};
use std::{
    fs::{File, OpenOptions},
    io,
    path::Path,
};

/// A fixed-size read-write mapping that can be attached from more than one
/// execution context.
///
/// The base pointer is captured once at construction so the region can be
/// shared behind an `Arc` without needing `&mut` access to the mapping.
/// Typed access (cursor header, payload copies) is the caller's job.
pub struct SharedRegion {
    file: Option<File>,
    _mmap: MmapMut,
    base: *mut u8,
    len: usize,
}

impl SharedRegion {
    /// Map `size_bytes` of zero-filled anonymous memory, private to this process.
    pub fn anonymous(size_bytes: usize) -> io::Result<Self> {
        let mut mmap = MmapOptions::new().len(size_bytes).map_anon()?;
        let base = mmap.as_mut_ptr();
        Ok(Self {
            file: None,
            _mmap: mmap,
            base,
            len: size_bytes,
        })
    }

    /// Create a new file of `size_bytes` and map it read-write
    pub fn create_rw<P: AsRef<Path>>(path: P, size_bytes: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.set_len(size_bytes)?;

        Self::map_file(file)
    }

    /// Open an existing file and map it to read and write
    pub fn open_rw<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::map_file(file)
    }

    fn map_file(file: File) -> io::Result<Self> {
        // SAFETY: the mapping is kept alive alongside the file handle; concurrent
        // modification by other processes is the documented purpose of the region.
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        let base = mmap.as_mut_ptr();
        let len = mmap.len();
        Ok(Self {
            file: Some(file),
            _mmap: mmap,
            base,
            len,
        })
    }

    /// Return raw pointer to start of the mapped data
    #[inline]
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.base
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True when the region is backed by a file rather than anonymous memory.
    pub fn is_file_backed(&self) -> bool {
        self.file.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_region_is_zeroed() {
        let region = SharedRegion::anonymous(64).unwrap();
        assert_eq!(region.len(), 64);
        assert!(!region.is_file_backed());
        let bytes = unsafe { std::slice::from_raw_parts(region.as_mut_ptr(), region.len()) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn file_region_is_visible_to_second_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region");

        let writer = SharedRegion::create_rw(&path, 32).unwrap();
        unsafe { writer.as_mut_ptr().add(5).write(0xAB) };

        let reader = SharedRegion::open_rw(&path).unwrap();
        assert_eq!(reader.len(), 32);
        assert!(reader.is_file_backed());
        assert_eq!(unsafe { reader.as_mut_ptr().add(5).read() }, 0xAB);
    }
}
