// Single import point for synchronization primitives: loom's versions under
// `cfg(loom)`, std's otherwise.
//
// Nothing else in the crate may name `std::sync::atomic` directly — an
// atomic that reaches std behind loom's back is invisible to the model
// checker, and the exhaustive interleaving runs quietly stop meaning
// anything.
#![allow(unused_imports, unused_macros)]

// ---------------------------------------------------------------------------
// atomic
// ---------------------------------------------------------------------------
pub(crate) mod atomic {
    #[cfg(loom)]
    pub(crate) use loom::sync::atomic::{AtomicIsize, AtomicPtr, AtomicUsize, Ordering, fence};

    #[cfg(not(loom))]
    pub(crate) use std::sync::atomic::{AtomicIsize, AtomicPtr, AtomicUsize, Ordering, fence};
}

// ---------------------------------------------------------------------------
// sync (Mutex, Arc, RwLock)
// ---------------------------------------------------------------------------
#[cfg(loom)]
pub(crate) use loom::sync::{Arc, Mutex, RwLock};

#[cfg(not(loom))]
pub(crate) use std::sync::{Arc, Mutex, RwLock};

// ---------------------------------------------------------------------------
// thread
// ---------------------------------------------------------------------------
pub(crate) mod thread {
    #[cfg(loom)]
    pub(crate) use loom::thread::{JoinHandle, current, spawn, yield_now};

    #[cfg(not(loom))]
    pub(crate) use std::thread::{JoinHandle, current, spawn, yield_now};
}

// ---------------------------------------------------------------------------
// Barrier — used only by the (non-loom) stress tests; loom model tests keep
// their thread counts too small to need one.
// ---------------------------------------------------------------------------
pub(crate) mod barrier {
    pub(crate) use std::sync::Barrier;
}

// ---------------------------------------------------------------------------
// OnceLock — no loom variant needed.  Its only consumer is the platform
// page-size cache in vm.rs, and that whole module is compiled out under
// loom/miri (the page-ops mock answers a fixed page size instead).
// ---------------------------------------------------------------------------
#[cfg(not(loom))]
pub(crate) use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Static initialisation helper
//
// A `static` holding loom types cannot use const init (loom's constructors
// allocate tracking state). This macro picks the right form per cfg: a
// plain const-initialised static normally, `loom::lazy_static!` under loom
// so the value is rebuilt for every model run.
//
// Usage: `static_shared! { [pub] static NAME: Type = init_expr; }`
// ---------------------------------------------------------------------------
#[allow(unused_macro_rules)]
macro_rules! static_shared {
    (pub static $NAME:ident : $Ty:ty = $init:expr ;) => {
        #[cfg(not(loom))]
        pub static $NAME: $Ty = $init;

        #[cfg(loom)]
        loom::lazy_static! {
            pub static ref $NAME: $Ty = $init;
        }
    };
    (static $NAME:ident : $Ty:ty = $init:expr ;) => {
        #[cfg(not(loom))]
        static $NAME: $Ty = $init;

        #[cfg(loom)]
        loom::lazy_static! {
            static ref $NAME: $Ty = $init;
        }
    };
}
pub(crate) use static_shared;
