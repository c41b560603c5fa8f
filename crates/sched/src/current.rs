//! The region a worker thread is ticking right now.
//!
//! Set by the scheduler for the duration of one region tick (task drain and
//! ticker), so code running inside a tick can check it stays within its own
//! chunks.

use std::cell::RefCell;
use std::sync::Arc;

use tickspace_region::Region;

/// Type-erased view of the ticking region.
pub(crate) trait TickingRegion {
    fn id(&self) -> u64;
    fn contains_chunk(&self, x: i32, z: i32) -> bool;
}

impl<D> TickingRegion for Region<D> {
    fn id(&self) -> u64 {
        Region::id(self)
    }

    fn contains_chunk(&self, x: i32, z: i32) -> bool {
        Region::contains_chunk(self, x, z)
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<dyn TickingRegion>>> = const { RefCell::new(None) };
}

/// Restores the previous current region when dropped.
pub(crate) struct Entered {
    previous: Option<Arc<dyn TickingRegion>>,
}

/// Make `region` the current region of this thread until the guard drops.
pub(crate) fn enter(region: Arc<dyn TickingRegion>) -> Entered {
    let previous = CURRENT.with(|current| current.replace(Some(region)));
    Entered { previous }
}

impl Drop for Entered {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

fn with_current<R>(f: impl FnOnce(&dyn TickingRegion) -> R) -> Option<R> {
    CURRENT.with(|current| current.borrow().as_deref().map(f))
}

/// Id of the region this thread is ticking.
pub fn current_region_id() -> Option<u64> {
    with_current(|region| region.id())
}

/// Whether this thread is inside a region tick.
pub fn is_region_thread() -> bool {
    with_current(|_| ()).is_some()
}

/// Whether the current region holds chunk `(x, z)`, or any loaded chunk
/// within `radius` (Chebyshev) of it. False outside a region tick.
pub fn owns_chunk(x: i32, z: i32, radius: i32) -> bool {
    let radius = radius.max(0);
    with_current(|region| {
        (-radius..=radius).any(|dx| {
            let Some(cx) = x.checked_add(dx) else {
                return false;
            };
            (-radius..=radius).any(|dz| {
                z.checked_add(dz)
                    .is_some_and(|cz| region.contains_chunk(cx, cz))
            })
        })
    })
    .unwrap_or(false)
}
