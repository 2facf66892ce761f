use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use crossbeam_epoch::Owned;

#[derive(Debug, Default)]
struct Counters {
    created: AtomicU32,
    dropped: AtomicU32,
}

/// Hands out values that count their own construction and destruction.
#[derive(Clone, Debug, Default)]
pub(crate) struct DropTracker {
    counters: Arc<Counters>,
}

impl DropTracker {
    pub(crate) fn value(&self, id: u32) -> Tracked {
        self.counters.created.fetch_add(1, Ordering::AcqRel);
        Tracked {
            id,
            counters: Arc::clone(&self.counters),
        }
    }

    pub(crate) fn created(&self) -> u32 {
        self.counters.created.load(Ordering::Acquire)
    }

    pub(crate) fn dropped(&self) -> u32 {
        self.counters.dropped.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub(crate) struct Tracked {
    id: u32,
    counters: Arc<Counters>,
}

impl Tracked {
    pub(crate) fn id(&self) -> u32 {
        self.id
    }
}

impl Clone for Tracked {
    fn clone(&self) -> Self {
        self.counters.created.fetch_add(1, Ordering::AcqRel);
        Self {
            id: self.id,
            counters: Arc::clone(&self.counters),
        }
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.counters.dropped.fetch_add(1, Ordering::AcqRel);
    }
}

/// Pushes the global epoch forward until deferred destructions have run.
pub(crate) fn run_deferred() {
    for _ in 0..65536 {
        let guard = crossbeam_epoch::pin();

        unsafe { guard.defer_destroy(Owned::new(0).into_shared(&guard)) };

        guard.flush();
    }
}
