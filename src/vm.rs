use std::fmt;
use std::ptr::NonNull;

#[derive(Debug)]
pub enum PageMapError {
    MapFailed(std::io::Error),
    UnmapFailed(std::io::Error),
}

impl fmt::Display for PageMapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageMapError::MapFailed(e) => write!(f, "page mapping failed: {e}"),
            PageMapError::UnmapFailed(e) => write!(f, "page unmapping failed: {e}"),
        }
    }
}

impl std::error::Error for PageMapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PageMapError::MapFailed(e) | PageMapError::UnmapFailed(e) => Some(e),
        }
    }
}

/// Abstract interface for page-granular anonymous memory.
pub(crate) trait PageOps {
    /// OS page size. Constant for the process lifetime.
    fn page_size() -> usize;

    /// Acquire `len` bytes (a multiple of the page size) of zero-initialized,
    /// readable, writable, anonymous, private memory.
    unsafe fn map(len: usize) -> Result<NonNull<u8>, PageMapError>;

    /// Release `len` bytes starting at `ptr`. `ptr` need not be the original
    /// map base: trimming a sub-range of a mapping is allowed as long as both
    /// `ptr` and `len` are page-aligned.
    unsafe fn unmap(ptr: NonNull<u8>, len: usize) -> Result<(), PageMapError>;
}

pub(crate) struct PlatformPageOps;

#[cfg(all(unix, not(any(loom, miri))))]
mod unix {
    use super::{PageMapError, PageOps, PlatformPageOps};
    use std::io;
    use std::ptr::NonNull;

    impl PageOps for PlatformPageOps {
        fn page_size() -> usize {
            use crate::sync::OnceLock;
            static CACHED: OnceLock<usize> = OnceLock::new();
            *CACHED.get_or_init(|| {
                // Safety: FFI call to sysconf.
                let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
                assert!(
                    raw > 0,
                    "sysconf(_SC_PAGESIZE) failed: {}",
                    io::Error::last_os_error()
                );
                // PORTABILITY: this crate supports only 64-bit targets; the
                // page size fits in usize there.
                #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
                {
                    raw as usize
                }
            })
        }

        unsafe fn map(len: usize) -> Result<NonNull<u8>, PageMapError> {
            // Safety: FFI call to mmap.
            let ptr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANON,
                    -1,
                    0,
                )
            };

            if ptr == libc::MAP_FAILED {
                return Err(PageMapError::MapFailed(io::Error::last_os_error()));
            }

            match NonNull::new(ptr.cast::<u8>()) {
                Some(p) => Ok(p),
                None => Err(PageMapError::MapFailed(io::Error::other(
                    "mmap returned null",
                ))),
            }
        }

        unsafe fn unmap(ptr: NonNull<u8>, len: usize) -> Result<(), PageMapError> {
            // Safety: FFI call to munmap.
            if unsafe { libc::munmap(ptr.as_ptr().cast::<libc::c_void>(), len) } != 0 {
                return Err(PageMapError::UnmapFailed(io::Error::last_os_error()));
            }
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Loom/Miri mock: heap-backed PageOps (no real mmap)
//
// Under `cfg(loom)` we cannot issue real VM syscalls — loom runs inside a
// single OS process with its own scheduler.  Instead every mapping is backed
// by a page-aligned heap allocation (`std::alloc::alloc_zeroed`).
//
// A registry tracks each mapping together with its outstanding byte count so
// that partial trims are honoured: the backing heap block is freed once the
// sum of `unmap` lengths covers the original mapping.  The heap cannot
// actually release a sub-range, so trimmed pages stay resident until the
// whole mapping is gone — sufficient for model checking and Miri, where only
// pointer validity matters.
// ---------------------------------------------------------------------------
#[cfg(any(loom, miri))]
mod mock {
    use super::{PageMapError, PageOps, PlatformPageOps};
    use std::alloc::Layout;
    use std::ptr::NonNull;
    use std::sync::Mutex;

    pub(super) const MOCK_PAGE_SIZE: usize = 4096;

    struct Mapping {
        base: usize,
        len: usize,
        outstanding: usize,
    }

    // A std Mutex, not a loom one: the registry is mock plumbing, not a
    // synchronization point the model needs to explore.
    static MAPPINGS: Mutex<Vec<Mapping>> = Mutex::new(Vec::new());

    impl PageOps for PlatformPageOps {
        fn page_size() -> usize {
            MOCK_PAGE_SIZE
        }

        unsafe fn map(len: usize) -> Result<NonNull<u8>, PageMapError> {
            if len == 0 {
                return Err(PageMapError::MapFailed(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "zero-length mapping",
                )));
            }
            let layout = Layout::from_size_align(len, MOCK_PAGE_SIZE)
                .map_err(|e| PageMapError::MapFailed(std::io::Error::other(e)))?;
            // Safety: layout has non-zero size.
            let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
            let nn = NonNull::new(ptr).ok_or_else(|| {
                PageMapError::MapFailed(std::io::Error::new(
                    std::io::ErrorKind::OutOfMemory,
                    "alloc returned null",
                ))
            })?;
            MAPPINGS.lock().unwrap().push(Mapping {
                base: nn.as_ptr() as usize,
                len,
                outstanding: len,
            });
            Ok(nn)
        }

        unsafe fn unmap(ptr: NonNull<u8>, len: usize) -> Result<(), PageMapError> {
            let addr = ptr.as_ptr() as usize;
            let mut maps = MAPPINGS.lock().unwrap();
            let idx = maps
                .iter()
                .position(|m| addr >= m.base && addr + len <= m.base + m.len);
            let Some(idx) = idx else {
                debug_assert!(false, "unmap of {addr:#x}+{len} outside any mock mapping");
                return Err(PageMapError::UnmapFailed(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "range not mapped",
                )));
            };
            maps[idx].outstanding -= len;
            if maps[idx].outstanding == 0 {
                let m = maps.swap_remove(idx);
                drop(maps);
                let layout = Layout::from_size_align(m.len, MOCK_PAGE_SIZE)
                    .map_err(|e| PageMapError::UnmapFailed(std::io::Error::other(e)))?;
                // Safety: `m.base` was produced by alloc_zeroed with this layout.
                unsafe { std::alloc::dealloc(m.base as *mut u8, layout) };
            }
            Ok(())
        }
    }
}
