use crate::pool::{HEADER_SIZE, Header, POOL_COUNT, PoolArray, class_of};
use crate::span;
use crate::stats::{EntryCounters, PoolSnapshot, StatsSnapshot};
use crate::vm::{PageOps, PlatformPageOps};
use std::ptr::{self, NonNull};

/// The allocator: an array of lock-free size-class pools plus the
/// direct-mapping path for large and aligned requests.
///
/// All entry points take `&self` and are safe to call from any thread.
/// There is intentionally no `Drop`: pool spans live for the rest of the
/// process so that frees remain valid during late shutdown. Instances exist
/// so tests and the model checker can run against fresh state; dropping one
/// leaks its spans by design. Regular callers want [`GlobalSpanPool`].
pub struct SpanPool {
    pools: PoolArray,
    counters: EntryCounters,
}

impl SpanPool {
    #[cfg(not(loom))]
    pub const fn new() -> Self {
        Self {
            pools: PoolArray::new(),
            counters: EntryCounters::new(),
        }
    }

    #[cfg(loom)]
    pub fn new() -> Self {
        Self {
            pools: PoolArray::new(),
            counters: EntryCounters::new(),
        }
    }

    /// Allocate at least `size` bytes. Null on failure.
    ///
    /// The returned pointer is aligned to the header alignment (16); use
    /// [`alloc_aligned`](Self::alloc_aligned) for stricter requirements.
    pub fn alloc(&self, size: usize) -> *mut u8 {
        self.counters.alloc_calls.add(1);
        let Some(gross) = size.checked_add(HEADER_SIZE) else {
            return ptr::null_mut();
        };
        let class = class_of(gross);
        let h = if class < POOL_COUNT {
            self.pools.pop_class(class)
        } else {
            span::map_span(gross)
        };
        match h {
            // Safety: every block covers more than the header word.
            Some(h) => unsafe { Header::user_ptr(h) },
            None => ptr::null_mut(),
        }
    }

    /// Allocate at least `size` bytes with the user pointer aligned to
    /// `align`, which must be a power of two. Null on failure or on an
    /// invalid alignment.
    pub fn alloc_aligned(&self, align: usize, size: usize) -> *mut u8 {
        self.counters.aligned_alloc_calls.add(1);
        let Some(gross) = size.checked_add(HEADER_SIZE) else {
            return ptr::null_mut();
        };
        match span::map_span_aligned(align, gross) {
            // Safety: the span covers more than the header word.
            Some(h) => unsafe { Header::user_ptr(h) },
            None => ptr::null_mut(),
        }
    }

    /// Allocate a zero-filled region of `count * elem_size` bytes.
    /// A multiplication overflow fails with ENOMEM.
    pub fn alloc_zeroed(&self, count: usize, elem_size: usize) -> *mut u8 {
        let Some(total) = count.checked_mul(elem_size) else {
            set_errno(libc::ENOMEM);
            return ptr::null_mut();
        };
        let p = self.alloc(total);
        if !p.is_null() {
            // Safety: `p` covers at least `total` usable bytes.
            unsafe { ptr::write_bytes(p, 0, total) };
        }
        p
    }

    /// `alloc_aligned` at page-size alignment.
    pub fn alloc_page_aligned(&self, size: usize) -> *mut u8 {
        self.alloc_aligned(PlatformPageOps::page_size(), size)
    }

    /// Write an `align`-aligned allocation of `size` bytes to `out`.
    /// Returns 0 on success, ENOMEM on any failure.
    pub fn posix_memalign(&self, out: &mut *mut u8, align: usize, size: usize) -> i32 {
        let p = self.alloc_aligned(align, size);
        if p.is_null() {
            return libc::ENOMEM;
        }
        *out = p;
        0
    }

    /// Resize an allocation.
    ///
    /// Null `ptr` allocates; `new_size == 0` frees and returns null; shrinks
    /// stay in place; growth copies into a fresh region and frees the old
    /// one. If growth fails the original allocation stays valid and null is
    /// returned.
    ///
    /// # Safety
    /// `ptr` must be null or a live pointer previously returned by this
    /// allocator.
    // TODO: large direct-mapped spans could grow with mremap on Linux
    // instead of map+copy.
    pub unsafe fn realloc(&self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        self.counters.realloc_calls.add(1);
        let Some(p) = NonNull::new(ptr) else {
            return self.alloc(new_size);
        };
        if new_size == 0 {
            // Safety: live pointer per the contract.
            unsafe { self.free(ptr) };
            return ptr::null_mut();
        }
        // Safety: live pointer per the contract.
        let h = unsafe { Header::from_user_ptr(p) };
        // Safety: header of a live block.
        let usable = unsafe { h.as_ref() }.usable_size();
        if new_size <= usable {
            return ptr;
        }
        let new_ptr = self.alloc(new_size);
        if new_ptr.is_null() {
            return ptr::null_mut();
        }
        // Safety: both regions are live and disjoint; `usable` bytes exist
        // behind each.
        unsafe {
            ptr::copy_nonoverlapping(ptr.cast_const(), new_ptr, usable);
            self.free(ptr);
        }
        new_ptr
    }

    /// `realloc` to `count * elem_size` bytes, failing with ENOMEM on
    /// multiplication overflow.
    ///
    /// # Safety
    /// Same contract as [`realloc`](Self::realloc).
    pub unsafe fn reallocarray(&self, ptr: *mut u8, count: usize, elem_size: usize) -> *mut u8 {
        let Some(total) = count.checked_mul(elem_size) else {
            set_errno(libc::ENOMEM);
            return ptr::null_mut();
        };
        // Safety: forwarded contract.
        unsafe { self.realloc(ptr, total) }
    }

    /// Release an allocation. Null is a no-op.
    ///
    /// # Safety
    /// `ptr` must be null or a pointer previously returned by this allocator
    /// and not yet freed.
    pub unsafe fn free(&self, ptr: *mut u8) {
        let Some(p) = NonNull::new(ptr) else { return };
        // Safety: live pointer per the contract.
        let h = unsafe { Header::from_user_ptr(p) };
        #[cfg(debug_assertions)]
        {
            // Best-effort guard against double frees and pointers this
            // allocator never handed out; the offending call is dropped
            // rather than aborting. Not a security boundary.
            // Safety: the header word is readable for any pointer we issued.
            if !unsafe { h.as_ref() }.is_live() {
                self.counters.bad_frees.add(1);
                return;
            }
        }
        // Safety: header of a live block.
        let s = unsafe { h.as_ref() }.size();
        if s < POOL_COUNT {
            self.pools.push_class(s, h);
        } else {
            // Safety: live direct-mapped span.
            unsafe { span::release_span(h) };
        }
    }

    /// Usable bytes behind a live pointer. Zero for null.
    ///
    /// # Safety
    /// `ptr` must be null or a live pointer previously returned by this
    /// allocator.
    pub unsafe fn usable_size(&self, ptr: *mut u8) -> usize {
        let Some(p) = NonNull::new(ptr) else { return 0 };
        // Safety: live pointer per the contract.
        let h = unsafe { Header::from_user_ptr(p) };
        // Safety: header of a live block.
        unsafe { h.as_ref() }.usable_size()
    }

    /// Usable bytes a request for `size` would actually reserve: the gross
    /// size (request plus header) rounded to its class or to whole pages,
    /// minus the header. Equals `usable_size` of the resulting allocation.
    pub fn good_size(&self, size: usize) -> usize {
        let Some(gross) = size.checked_add(HEADER_SIZE) else {
            return size;
        };
        let class = class_of(gross);
        let total = if class < POOL_COUNT {
            1 << class
        } else {
            match gross.checked_next_multiple_of(PlatformPageOps::page_size()) {
                Some(r) => r,
                None => return size,
            }
        };
        total - HEADER_SIZE
    }

    /// Tuning knob endpoint. All parameters are accepted and ignored.
    pub fn set_option(&self, _param: i32, _value: i32) -> i32 {
        self.counters.option_calls.add(1);
        0
    }

    /// Snapshot of the diagnostic counters.
    pub fn stats(&self) -> StatsSnapshot {
        let mut pools = [PoolSnapshot::default(); POOL_COUNT];
        for (i, snap) in pools.iter_mut().enumerate() {
            let c = &self.pools.pool(i).counters;
            *snap = PoolSnapshot {
                alloc_calls: c.alloc_calls.get(),
                live_blocks: c.live_blocks.get(),
                free_blocks: c.free_blocks.get(),
            };
        }
        StatsSnapshot {
            page_size: PlatformPageOps::page_size(),
            alloc_calls: self.counters.alloc_calls.get(),
            aligned_alloc_calls: self.counters.aligned_alloc_calls.get(),
            realloc_calls: self.counters.realloc_calls.get(),
            option_calls: self.counters.option_calls.get(),
            bad_frees: self.counters.bad_frees.get(),
            pools,
        }
    }

    #[cfg(test)]
    pub(crate) fn pool_array(&self) -> &PoolArray {
        &self.pools
    }
}

impl Default for SpanPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(unix, not(any(loom, miri))))]
fn set_errno(code: i32) {
    // Safety: libc hands out a pointer to this thread's errno slot.
    unsafe {
        #[cfg(target_os = "linux")]
        {
            *libc::__errno_location() = code;
        }
        #[cfg(not(target_os = "linux"))]
        {
            *libc::__error() = code;
        }
    }
}

#[cfg(not(all(unix, not(any(loom, miri)))))]
fn set_errno(_code: i32) {}

crate::sync::static_shared! {
    static GLOBAL_INSTANCE: SpanPool = SpanPool::new();
}

/// Process-wide allocator handle.
///
/// The backing [`SpanPool`] is a plain `static`: usable before `main` (even
/// from library-initialization paths) and never torn down, so frees arriving
/// after `main` returns still land on valid pools.
pub struct GlobalSpanPool;

impl GlobalSpanPool {
    pub fn get() -> &'static SpanPool {
        #[cfg(all(debug_assertions, not(any(loom, miri))))]
        register_exit_report();
        #[cfg(not(loom))]
        {
            &GLOBAL_INSTANCE
        }
        #[cfg(loom)]
        {
            &*GLOBAL_INSTANCE
        }
    }

    pub fn alloc(size: usize) -> *mut u8 {
        Self::get().alloc(size)
    }

    pub fn alloc_aligned(align: usize, size: usize) -> *mut u8 {
        Self::get().alloc_aligned(align, size)
    }

    pub fn alloc_zeroed(count: usize, elem_size: usize) -> *mut u8 {
        Self::get().alloc_zeroed(count, elem_size)
    }

    /// # Safety
    /// See [`SpanPool::realloc`].
    pub unsafe fn realloc(ptr: *mut u8, new_size: usize) -> *mut u8 {
        // Safety: forwarded contract.
        unsafe { Self::get().realloc(ptr, new_size) }
    }

    /// # Safety
    /// See [`SpanPool::free`].
    pub unsafe fn free(ptr: *mut u8) {
        // Safety: forwarded contract.
        unsafe { Self::get().free(ptr) }
    }

    /// # Safety
    /// See [`SpanPool::usable_size`].
    pub unsafe fn usable_size(ptr: *mut u8) -> usize {
        // Safety: forwarded contract.
        unsafe { Self::get().usable_size(ptr) }
    }

    pub fn good_size(size: usize) -> usize {
        Self::get().good_size(size)
    }

    pub fn stats() -> StatsSnapshot {
        Self::get().stats()
    }
}

// Safety: delegates to SpanPool, which honours size and alignment for every
// layout and recovers block metadata from the pointer alone on dealloc.
unsafe impl std::alloc::GlobalAlloc for GlobalSpanPool {
    unsafe fn alloc(&self, layout: std::alloc::Layout) -> *mut u8 {
        let pool = Self::get();
        if layout.align() <= std::mem::align_of::<Header>() {
            pool.alloc(layout.size())
        } else {
            pool.alloc_aligned(layout.align(), layout.size())
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: std::alloc::Layout) {
        // Safety: GlobalAlloc contract — `ptr` came from this allocator.
        unsafe { Self::get().free(ptr) }
    }

    unsafe fn alloc_zeroed(&self, layout: std::alloc::Layout) -> *mut u8 {
        // Safety: same contract as `alloc`.
        let p = unsafe { self.alloc(layout) };
        if !p.is_null() {
            // Safety: `p` covers `layout.size()` bytes.
            unsafe { ptr::write_bytes(p, 0, layout.size()) };
        }
        p
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: std::alloc::Layout, new_size: usize) -> *mut u8 {
        let pool = Self::get();
        if layout.align() <= std::mem::align_of::<Header>() {
            // Safety: GlobalAlloc contract.
            unsafe { pool.realloc(ptr, new_size) }
        } else {
            // Over-aligned blocks must stay over-aligned: always move
            // through a fresh aligned span.
            let new_ptr = pool.alloc_aligned(layout.align(), new_size);
            if !new_ptr.is_null() {
                // Safety: both regions live and disjoint; the old block
                // holds at least `layout.size()` bytes.
                unsafe {
                    ptr::copy_nonoverlapping(ptr.cast_const(), new_ptr, layout.size().min(new_size));
                    pool.free(ptr);
                }
            }
            new_ptr
        }
    }
}

// Diagnostic builds dump a plaintext counter report, keyed by process id,
// when the process exits. Registered on first use of the global handle.
#[cfg(all(debug_assertions, not(any(loom, miri))))]
fn register_exit_report() {
    use std::sync::Once;
    static REGISTER: Once = Once::new();
    REGISTER.call_once(|| {
        extern "C" fn report_at_exit() {
            let snap = GlobalSpanPool::stats();
            let path = std::env::temp_dir().join(format!("spanpool.stats.{}", std::process::id()));
            if let Ok(mut f) = std::fs::File::create(&path) {
                use std::io::Write;
                let _ = writeln!(f, "{snap}");
            }
        }
        // Safety: FFI registration; the handler does not unwind.
        let _ = unsafe { libc::atexit(report_at_exit) };
    });
}
