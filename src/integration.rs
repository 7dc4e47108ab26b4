#[cfg(all(test, not(loom)))]
mod tests {
    use crate::dispatch::SpanPool;
    use crate::pool::POOL_COUNT;
    use crate::sync::Arc;
    use crate::sync::barrier::Barrier;
    use crate::sync::thread;
    use std::collections::HashSet;

    #[test]
    fn test_two_thread_churn_leaks_nothing() {
        // Two threads hammer one size class with alloc/free pairs. At
        // quiescence nothing may be live and every pool's stack must match
        // its free counter — no lost or duplicated blocks.
        let pool = Arc::new(SpanPool::new());
        let iters = 250_000u32;
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2u8)
            .map(|t| {
                let pool = pool.clone();
                let b = barrier.clone();
                thread::spawn(move || {
                    b.wait();
                    for _ in 0..iters {
                        let p = pool.alloc(8);
                        assert!(!p.is_null());
                        // Safety: live pointer with at least 8 usable bytes.
                        unsafe {
                            p.write(t);
                            assert_eq!(p.read(), t);
                            pool.free(p);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snap = pool.stats();
        for i in 0..POOL_COUNT {
            assert_eq!(snap.pools[i].live_blocks, 0, "class {i} leaked blocks");
            // Safety: all threads joined; the pools are quiescent.
            assert_eq!(
                unsafe { pool.pool_array().pool(i).free_list_len() },
                snap.pools[i].free_blocks,
                "class {i} stack disagrees with its counter"
            );
        }
    }

    #[test]
    fn test_live_addresses_are_unique_across_threads() {
        // Each thread holds a batch of live allocations while every other
        // thread does the same; the address sets must be disjoint.
        let pool = Arc::new(SpanPool::new());
        let threads = 4u8;
        let per_thread = 1000usize;
        let barrier = Arc::new(Barrier::new(threads as usize));

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let pool = pool.clone();
                let b = barrier.clone();
                thread::spawn(move || {
                    let mut ptrs = Vec::with_capacity(per_thread);
                    b.wait();
                    for _ in 0..per_thread {
                        let p = pool.alloc(48);
                        assert!(!p.is_null());
                        // Safety: live pointer with at least 48 usable bytes.
                        unsafe { p.write(t) };
                        ptrs.push(p as usize);
                    }
                    b.wait(); // every batch is live here
                    for &addr in &ptrs {
                        // Safety: still live, written by this thread only.
                        unsafe {
                            assert_eq!((addr as *mut u8).read(), t, "cross-thread clobber");
                            pool.free(addr as *mut u8);
                        }
                    }
                    ptrs
                })
            })
            .collect();

        let mut seen = HashSet::new();
        let mut total = 0;
        for h in handles {
            for addr in h.join().unwrap() {
                seen.insert(addr);
                total += 1;
            }
        }
        assert_eq!(seen.len(), total, "the same live address was handed out twice");
    }

    #[test]
    fn test_multi_size_contention_integrity() {
        let pool = Arc::new(SpanPool::new());
        let threads = 8u8;
        let iters = 200u8;
        let barrier = Arc::new(Barrier::new(threads as usize));

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let pool = pool.clone();
                let b = barrier.clone();
                thread::spawn(move || {
                    let mut ptrs = Vec::with_capacity(iters as usize);
                    b.wait();
                    for i in 0..iters {
                        let size = 16usize << (i % 4); // 16 to 128 bytes
                        let p = pool.alloc(size);
                        assert!(!p.is_null());
                        // Safety: live pointer.
                        unsafe {
                            p.write(t.wrapping_mul(31).wrapping_add(i));
                        }
                        ptrs.push(p);
                    }
                    for (i, &p) in (0u8..).zip(ptrs.iter()) {
                        // Safety: live pointer written by this thread.
                        unsafe {
                            assert_eq!(
                                p.read(),
                                t.wrapping_mul(31).wrapping_add(i),
                                "contention corrupted thread {t}"
                            );
                        }
                    }
                    for p in ptrs {
                        // Safety: live pointer.
                        unsafe { pool.free(p) };
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snap = pool.stats();
        for i in 0..POOL_COUNT {
            assert_eq!(snap.pools[i].live_blocks, 0, "class {i} leaked blocks");
        }
    }

    #[test]
    fn test_concurrent_realloc_and_aligned_mix() {
        let pool = Arc::new(SpanPool::new());
        let threads = 4u8;
        let barrier = Arc::new(Barrier::new(threads as usize));

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let pool = pool.clone();
                let b = barrier.clone();
                thread::spawn(move || {
                    b.wait();
                    for round in 0..50u8 {
                        // Grow a block through several classes into the
                        // direct-map range, checking the prefix each step.
                        let mut p = pool.alloc(16);
                        assert!(!p.is_null());
                        // Safety: live pointer.
                        unsafe { p.write(t ^ round) };
                        for size in [100usize, 3000, 70_000] {
                            // Safety: live pointer from this chain.
                            let q = unsafe { pool.realloc(p, size) };
                            assert!(!q.is_null());
                            // Safety: prefix preserved by realloc.
                            unsafe { assert_eq!(q.read(), t ^ round) };
                            p = q;
                        }
                        // Safety: live pointer.
                        unsafe { pool.free(p) };

                        let a = pool.alloc_aligned(1 << (4 + (round as usize % 8)), 200);
                        assert!(!a.is_null());
                        // Safety: live pointer.
                        unsafe {
                            a.write(t);
                            assert_eq!(a.read(), t);
                            pool.free(a);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snap = pool.stats();
        for i in 0..POOL_COUNT {
            assert_eq!(snap.pools[i].live_blocks, 0, "class {i} leaked blocks");
        }
    }
}
