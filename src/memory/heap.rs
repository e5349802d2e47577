//! Heap tracking for the observed program
//!
//! This module provides:
//! - [`HeapRegistry`]: the table of live [`AllocationRecord`]s, keyed by address
//! - [`Interceptor`]: the tracked allocator every instrumented allocation and
//!   deallocation goes through, with its re-entrancy guard and enrichment
//! - [`HeapPtr`]: a pointer to a tracked heap value
//!
//! # Re-entrancy
//!
//! The interceptor raises a guard flag while it does its own bookkeeping and
//! while it renders heap values for enrichment. Any allocation or free that
//! arrives while the flag is raised (a value's rendering allocating a helper
//! object through the tracked API, say) is forwarded straight to the real
//! allocator and never recorded.
//!
//! # Enrichment
//!
//! A fresh record only knows its size. Whenever a pointer with a statically
//! known pointee type is observed, the record it targets is refined in place
//! with that type and a rendering of the pointee. Rendering can reach other
//! pointers (a linked list node renders its `next`), so enrichment nests; a
//! depth counter caps the nesting so cyclic structures terminate.

use super::value::{type_tag, Render};
use super::{format_address, Address};
use crate::constants::RAW_TYPE_TAG;
use crate::errors::{DebugError, Result};
use rustc_hash::FxHashMap;
use std::any::Any;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::{trace, warn};

/// Bookkeeping entry for one live allocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRecord {
    pub address: Address,
    /// Size in bytes, `None` while unknown
    pub size: Option<usize>,
    /// `raw` until a typed pointer into the block is observed
    pub type_tag: String,
    pub value: String,
    pub is_array: bool,
}

impl AllocationRecord {
    pub fn new(address: Address, size: Option<usize>, is_array: bool) -> Self {
        let value = match size {
            Some(bytes) => format!("Allocated ({} bytes)", bytes),
            None => "Allocated".to_string(),
        };
        AllocationRecord {
            address,
            size,
            type_tag: RAW_TYPE_TAG.to_string(),
            value,
            is_array,
        }
    }

    /// Identity written in the snapshot's name field
    pub fn name(&self) -> String {
        format!("*{}", format_address(self.address))
    }
}

/// Live allocation records, ordered by address
#[derive(Debug, Clone, Default)]
pub struct HeapRegistry {
    records: BTreeMap<Address, AllocationRecord>,
}

impl HeapRegistry {
    pub fn new() -> Self {
        HeapRegistry {
            records: BTreeMap::new(),
        }
    }

    /// Insert a fresh record, replacing any stale one at the same address
    pub fn register(&mut self, address: Address, size: Option<usize>, is_array: bool) {
        self.records
            .insert(address, AllocationRecord::new(address, size, is_array));
    }

    /// Remove the record at `address`; unknown addresses are ignored
    pub fn unregister(&mut self, address: Address) -> Option<AllocationRecord> {
        self.records.remove(&address)
    }

    /// Refine a live record in place. Returns whether a record was updated.
    pub fn update(&mut self, address: Address, type_tag: &str, value: String) -> bool {
        match self.records.get_mut(&address) {
            Some(record) => {
                record.type_tag.clear();
                record.type_tag.push_str(type_tag);
                record.value = value;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, address: Address) -> Option<&AllocationRecord> {
        self.records.get(&address)
    }

    pub fn contains(&self, address: Address) -> bool {
        self.records.contains_key(&address)
    }

    /// Record with the lowest address
    pub fn first(&self) -> Result<&AllocationRecord> {
        self.records
            .values()
            .next()
            .ok_or(DebugError::EmptyCollection {
                what: "heap registry",
                op: "first",
            })
    }

    /// Record with the highest address
    pub fn last(&self) -> Result<&AllocationRecord> {
        self.records
            .values()
            .next_back()
            .ok_or(DebugError::EmptyCollection {
                what: "heap registry",
                op: "last",
            })
    }

    pub fn records(&self) -> impl Iterator<Item = &AllocationRecord> {
        self.records.values()
    }

    pub fn addresses(&self) -> impl Iterator<Item = Address> + '_ {
        self.records.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

/// Raises a flag for its lifetime and restores the previous state on drop
struct FlagGuard<'a> {
    flag: &'a Cell<bool>,
    previous: bool,
}

impl<'a> FlagGuard<'a> {
    fn raise(flag: &'a Cell<bool>) -> Self {
        let previous = flag.replace(true);
        FlagGuard { flag, previous }
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(self.previous);
    }
}

/// Increments a counter for its lifetime
struct DepthGuard<'a>(&'a Cell<usize>);

impl<'a> DepthGuard<'a> {
    fn enter(depth: &'a Cell<usize>) -> Self {
        depth.set(depth.get() + 1);
        DepthGuard(depth)
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

/// Tracked allocator shared by a session and every [`HeapPtr`] it hands out
#[derive(Debug)]
pub struct Interceptor {
    registry: RefCell<HeapRegistry>,
    /// Byte blocks handed out by [`Interceptor::allocate_bytes`]
    raw_blocks: RefCell<FxHashMap<Address, Box<[u8]>>>,
    /// Typed cells stay reserved until freed, even with no pointer left
    cells: RefCell<FxHashMap<Address, Rc<dyn Any>>>,
    in_hook: Cell<bool>,
    depth: Cell<usize>,
    depth_limit: usize,
}

impl Interceptor {
    pub fn new(depth_limit: usize) -> Self {
        Interceptor {
            registry: RefCell::new(HeapRegistry::new()),
            raw_blocks: RefCell::new(FxHashMap::default()),
            cells: RefCell::new(FxHashMap::default()),
            in_hook: Cell::new(false),
            depth: Cell::new(0),
            depth_limit,
        }
    }

    /// Whether the re-entrancy guard is currently raised
    pub fn in_hook(&self) -> bool {
        self.in_hook.get()
    }

    /// Current enrichment nesting depth
    pub fn enrich_depth(&self) -> usize {
        self.depth.get()
    }

    /// Allocate `size` zeroed bytes and return their address
    pub fn allocate_bytes(&self, size: usize, is_array: bool) -> Address {
        let bypass = self.in_hook.get();
        let _guard = FlagGuard::raise(&self.in_hook);

        // A zero-sized box has no unique address
        let block = vec![0u8; size.max(1)].into_boxed_slice();
        let address = block.as_ptr() as usize as Address;
        self.raw_blocks.borrow_mut().insert(address, block);

        if bypass {
            trace!(address = %format_address(address), size, "untracked allocation");
        } else {
            self.registry
                .borrow_mut()
                .register(address, Some(size), is_array);
            trace!(address = %format_address(address), size, is_array, "allocation");
        }
        address
    }

    /// Free an address. Unknown addresses are a silent no-op.
    pub fn deallocate(&self, address: Address) {
        let bypass = self.in_hook.get();
        let _guard = FlagGuard::raise(&self.in_hook);

        if !bypass && self.registry.borrow_mut().unregister(address).is_none() {
            trace!(address = %format_address(address), "free of untracked address");
        }
        // Dropping the block hands the bytes back to the real allocator.
        // Cell contents are dropped after the maps are released.
        let block = self.raw_blocks.borrow_mut().remove(&address);
        let cell = if bypass {
            None
        } else {
            self.cells.borrow_mut().remove(&address)
        };
        drop((block, cell));
    }

    /// Move `value` to the heap and track it
    pub fn allocate<T: Render + 'static>(self: &Rc<Self>, value: T) -> HeapPtr<T> {
        self.allocate_cell(value, std::mem::size_of::<T>(), false)
    }

    /// Move `values` to the heap as one array block and track it
    pub fn allocate_array<T: Render + 'static>(
        self: &Rc<Self>,
        values: Vec<T>,
    ) -> HeapPtr<Vec<T>> {
        let size = values.len() * std::mem::size_of::<T>();
        self.allocate_cell(values, size, true)
    }

    fn allocate_cell<T: 'static>(
        self: &Rc<Self>,
        value: T,
        size: usize,
        is_array: bool,
    ) -> HeapPtr<T> {
        let bypass = self.in_hook.get();
        let _guard = FlagGuard::raise(&self.in_hook);

        let cell = Rc::new(RefCell::new(value));
        let address = cell_address(&cell);

        if bypass {
            trace!(address = %format_address(address), size, "untracked allocation");
        } else {
            self.registry
                .borrow_mut()
                .register(address, Some(size), is_array);
            let keeper: Rc<dyn Any> = cell.clone();
            self.cells.borrow_mut().insert(address, keeper);
            trace!(address = %format_address(address), size, is_array, "allocation");
        }

        HeapPtr {
            target: Some(cell),
            heap: Rc::downgrade(self),
        }
    }

    /// Free the block `ptr` targets. Other copies of the pointer keep the
    /// storage alive but the block no longer shows up in snapshots.
    pub fn free<T>(&self, ptr: HeapPtr<T>) {
        if !ptr.is_null() {
            self.deallocate(ptr.address());
        }
    }

    /// Refine the record at `address` using `render` for its value.
    ///
    /// Skipped when the address is not tracked or the nesting cap is hit.
    pub fn enrich_with(&self, address: Address, type_tag: &str, render: impl FnOnce() -> String) {
        if address == 0 || !self.registry.borrow().contains(address) {
            return;
        }
        if self.depth.get() >= self.depth_limit {
            warn!(
                address = %format_address(address),
                limit = self.depth_limit,
                "enrichment depth limit reached"
            );
            return;
        }

        let _depth = DepthGuard::enter(&self.depth);
        let _guard = FlagGuard::raise(&self.in_hook);

        // Rendering may enrich other records, so the registry stays unborrowed
        let value = render();
        self.registry.borrow_mut().update(address, type_tag, value);
    }

    /// Refine the record at `address` with the type and value of `target`
    ///
    /// A target that is mutably borrowed right now keeps its last rendering.
    pub fn enrich<T: Render>(&self, address: Address, target: &RefCell<T>) {
        let Ok(value) = target.try_borrow() else {
            trace!(address = %format_address(address), "target busy; record left as is");
            return;
        };
        self.enrich_with(address, &type_tag::<T>(), || value.render());
    }

    /// Snapshot of every live record, ordered by address
    pub fn records(&self) -> Vec<AllocationRecord> {
        self.registry.borrow().records().cloned().collect()
    }

    /// Read access to the registry
    pub fn registry(&self) -> Ref<'_, HeapRegistry> {
        self.registry.borrow()
    }

    /// Drop every record, raw block and reserved cell
    pub fn clear(&self) {
        self.registry.borrow_mut().clear();
        self.raw_blocks.borrow_mut().clear();
        let cells = std::mem::take(&mut *self.cells.borrow_mut());
        drop(cells);
    }
}

impl Default for Interceptor {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_ENRICH_DEPTH_LIMIT)
    }
}

fn cell_address<T>(cell: &Rc<RefCell<T>>) -> Address {
    Rc::as_ptr(cell) as *const () as usize as Address
}

/// A pointer to a tracked heap value, or null
///
/// Copies alias the same storage, like raw pointers in the observed program.
pub struct HeapPtr<T> {
    target: Option<Rc<RefCell<T>>>,
    heap: Weak<Interceptor>,
}

impl<T> HeapPtr<T> {
    pub fn null() -> Self {
        HeapPtr {
            target: None,
            heap: Weak::new(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.target.is_none()
    }

    /// Address of the target, 0 for null
    pub fn address(&self) -> Address {
        self.target.as_ref().map_or(0, cell_address)
    }

    /// Whether both pointers target the same block
    pub fn ptr_eq(&self, other: &HeapPtr<T>) -> bool {
        self.address() == other.address()
    }

    pub fn borrow(&self) -> Result<Ref<'_, T>> {
        let cell = self.target.as_ref().ok_or(DebugError::NullDereference)?;
        cell.try_borrow()
            .map_err(|_| DebugError::BorrowConflict {
                name: format_address(self.address()),
            })
    }

    pub fn borrow_mut(&self) -> Result<RefMut<'_, T>> {
        let cell = self.target.as_ref().ok_or(DebugError::NullDereference)?;
        cell.try_borrow_mut()
            .map_err(|_| DebugError::BorrowConflict {
                name: format_address(self.address()),
            })
    }
}

impl<T: Render> HeapPtr<T> {
    /// Refine the target's heap record with this pointer's static type
    pub fn enrich(&self) {
        if let (Some(cell), Some(heap)) = (&self.target, self.heap.upgrade()) {
            heap.enrich(cell_address(cell), cell);
        }
    }

    /// Rendering of the target, `None` for null
    pub fn render_target(&self) -> Option<String> {
        let cell = self.target.as_ref()?;
        self.enrich();
        Some(match cell.try_borrow() {
            Ok(value) => value.render(),
            Err(_) => crate::constants::OPAQUE_VALUE.to_string(),
        })
    }
}

impl<T> Clone for HeapPtr<T> {
    fn clone(&self) -> Self {
        HeapPtr {
            target: self.target.clone(),
            heap: self.heap.clone(),
        }
    }
}

impl<T> Default for HeapPtr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> fmt::Debug for HeapPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "HeapPtr(null)")
        } else {
            write!(f, "HeapPtr({})", format_address(self.address()))
        }
    }
}

/// Pointers nested inside other values render as their quoted address and
/// enrich the block they target along the way
impl<T: Render> Render for HeapPtr<T> {
    fn render(&self) -> String {
        if self.is_null() {
            return "null".to_string();
        }
        self.enrich();
        format!("\"{}\"", format_address(self.address()))
    }
}
