//! Observed variables
//!
//! Every traced variable is exposed through the [`Observe`] trait regardless of
//! its type. Observers alias the variable's storage; they never copy it, so a
//! snapshot always shows the value at the moment it is taken.
//!
//! [`ObserverRegistry`] keeps the live observers in declaration order. Scopes
//! normally close in reverse order, but nothing relies on it: entries sit in a
//! slab threaded by a doubly linked list, with an id index on the side, so any
//! entry can be unlinked in constant time without disturbing the others.

use super::heap::HeapPtr;
use super::value::{type_tag, Render};
use super::{format_address, Address};
use crate::constants::{NULL_DEREF_VALUE, NULL_POINTER_VALUE, OPAQUE_VALUE, POINTER_TYPE_TAG};
use crate::errors::{DebugError, Result};
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{trace, warn};

/// Uniform view of one observed variable
pub trait Observe {
    /// Static type tag written in the snapshot
    fn type_tag(&self) -> String;

    /// Address of the variable's own storage
    fn address(&self) -> Address;

    /// Current value, rendered
    fn value(&self) -> String;

    /// Address the variable points to; `None` when not a pointer or null
    fn target_address(&self) -> Option<Address> {
        None
    }

    /// Rendering of the pointee; `None` when not a pointer
    fn deref_value(&self) -> Option<String> {
        None
    }
}

fn cell_address<T>(cell: &Rc<RefCell<T>>) -> Address {
    Rc::as_ptr(cell) as *const () as usize as Address
}

/// Observer for a plain value
pub struct ValueObserver<T> {
    cell: Rc<RefCell<T>>,
}

impl<T> ValueObserver<T> {
    pub fn new(cell: Rc<RefCell<T>>) -> Self {
        ValueObserver { cell }
    }
}

impl<T: Render> Observe for ValueObserver<T> {
    fn type_tag(&self) -> String {
        type_tag::<T>()
    }

    fn address(&self) -> Address {
        cell_address(&self.cell)
    }

    fn value(&self) -> String {
        match self.cell.try_borrow() {
            Ok(value) => value.render(),
            Err(_) => OPAQUE_VALUE.to_string(),
        }
    }
}

/// Observer for a pointer variable
///
/// Reading its value or its pointee enriches the heap record it targets.
pub struct PointerObserver<T> {
    cell: Rc<RefCell<HeapPtr<T>>>,
}

impl<T> PointerObserver<T> {
    pub fn new(cell: Rc<RefCell<HeapPtr<T>>>) -> Self {
        PointerObserver { cell }
    }

    fn pointer(&self) -> Option<HeapPtr<T>> {
        self.cell.try_borrow().ok().map(|ptr| ptr.clone())
    }
}

impl<T: Render> Observe for PointerObserver<T> {
    fn type_tag(&self) -> String {
        POINTER_TYPE_TAG.to_string()
    }

    fn address(&self) -> Address {
        cell_address(&self.cell)
    }

    fn value(&self) -> String {
        match self.pointer() {
            Some(ptr) if ptr.is_null() => NULL_POINTER_VALUE.to_string(),
            Some(ptr) => {
                ptr.enrich();
                format_address(ptr.address())
            }
            None => OPAQUE_VALUE.to_string(),
        }
    }

    fn target_address(&self) -> Option<Address> {
        self.pointer()
            .filter(|ptr| !ptr.is_null())
            .map(|ptr| ptr.address())
    }

    fn deref_value(&self) -> Option<String> {
        let rendered = match self.pointer() {
            Some(ptr) => ptr
                .render_target()
                .unwrap_or_else(|| NULL_DEREF_VALUE.to_string()),
            None => OPAQUE_VALUE.to_string(),
        };
        Some(rendered)
    }
}

/// Identity of one registry entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

/// A live observed variable
pub struct ObservedVar {
    pub name: String,
    /// Label of the activation the variable was declared in
    pub frame: String,
    pub observer: Box<dyn Observe>,
}

struct Node {
    id: ObserverId,
    var: ObservedVar,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Live observers, oldest at the head and most recent at the tail
#[derive(Default)]
pub struct ObserverRegistry {
    slots: Vec<Option<Node>>,
    vacant: Vec<usize>,
    index: FxHashMap<ObserverId, usize>,
    head: Option<usize>,
    tail: Option<usize>,
    next_id: u64,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an observer as the most recent entry
    pub fn open(
        &mut self,
        name: impl Into<String>,
        frame: impl Into<String>,
        observer: Box<dyn Observe>,
    ) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;

        let node = Node {
            id,
            var: ObservedVar {
                name: name.into(),
                frame: frame.into(),
                observer,
            },
            prev: self.tail,
            next: None,
        };

        let slot = match self.vacant.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };

        match self.tail {
            Some(tail) => self.node_mut(tail).next = Some(slot),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
        self.index.insert(id, slot);

        trace!(?id, slot, "observer opened");
        id
    }

    /// Remove exactly the entry `id`. Unknown ids are ignored.
    pub fn close(&mut self, id: ObserverId) -> Option<ObservedVar> {
        let Some(slot) = self.index.remove(&id) else {
            warn!(?id, "close of unknown observer");
            return None;
        };

        if self.tail != Some(slot) {
            trace!(?id, "observer closed out of order");
        }

        let node = self.slots[slot].take()?;
        match node.prev {
            Some(prev) => self.node_mut(prev).next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => self.node_mut(next).prev = node.prev,
            None => self.tail = node.prev,
        }
        self.vacant.push(slot);

        Some(node.var)
    }

    pub fn get(&self, id: ObserverId) -> Option<&ObservedVar> {
        let slot = *self.index.get(&id)?;
        self.slots[slot].as_ref().map(|node| &node.var)
    }

    pub fn contains(&self, id: ObserverId) -> bool {
        self.index.contains_key(&id)
    }

    /// Most recently opened entry
    pub fn most_recent(&self) -> Result<&ObservedVar> {
        self.tail
            .and_then(|slot| self.slots[slot].as_ref())
            .map(|node| &node.var)
            .ok_or(DebugError::EmptyCollection {
                what: "variable registry",
                op: "most_recent",
            })
    }

    /// Live entries, most recently opened first
    pub fn iter(&self) -> RecentFirst<'_> {
        RecentFirst {
            registry: self,
            cursor: self.tail,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.vacant.clear();
        self.index.clear();
        self.head = None;
        self.tail = None;
    }

    fn node_mut(&mut self, slot: usize) -> &mut Node {
        self.slots[slot]
            .as_mut()
            .unwrap_or_else(|| unreachable!("linked slot {} is vacant", slot))
    }
}

/// Iterator over a registry from the most recent entry backwards
pub struct RecentFirst<'a> {
    registry: &'a ObserverRegistry,
    cursor: Option<usize>,
}

impl<'a> Iterator for RecentFirst<'a> {
    type Item = &'a ObservedVar;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.registry.slots[self.cursor?].as_ref()?;
        self.cursor = node.prev;
        Some(&node.var)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::heap::Interceptor;

    struct Fixed(&'static str);

    impl Observe for Fixed {
        fn type_tag(&self) -> String {
            "fixed".to_string()
        }

        fn address(&self) -> Address {
            0
        }

        fn value(&self) -> String {
            self.0.to_string()
        }
    }

    fn open(registry: &mut ObserverRegistry, name: &'static str) -> ObserverId {
        registry.open(name, "main", Box::new(Fixed(name)))
    }

    fn names(registry: &ObserverRegistry) -> Vec<String> {
        registry.iter().map(|var| var.name.clone()).collect()
    }

    #[test]
    fn test_nested_scopes_empty_out() {
        let mut registry = ObserverRegistry::new();
        let a = open(&mut registry, "a");
        let b = open(&mut registry, "b");
        let c = open(&mut registry, "c");
        assert_eq!(names(&registry), ["c", "b", "a"]);

        for id in [c, b, a] {
            assert!(registry.close(id).is_some());
        }
        assert!(registry.is_empty());
        assert_eq!(registry.iter().count(), 0);
    }

    #[test]
    fn test_out_of_order_close_removes_one_entry() {
        let mut registry = ObserverRegistry::new();
        let a = open(&mut registry, "a");
        let b = open(&mut registry, "b");
        let _c = open(&mut registry, "c");

        let removed = registry.close(b).unwrap();
        assert_eq!(removed.name, "b");
        assert_eq!(names(&registry), ["c", "a"]);

        registry.close(a).unwrap();
        assert_eq!(names(&registry), ["c"]);
        assert_eq!(registry.most_recent().unwrap().name, "c");
    }

    #[test]
    fn test_duplicate_names_removed_by_identity() {
        let mut registry = ObserverRegistry::new();
        let first = open(&mut registry, "i");
        let second = open(&mut registry, "i");
        registry.close(first).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(second));
        assert!(!registry.contains(first));
    }

    #[test]
    fn test_unknown_close_is_ignored() {
        let mut registry = ObserverRegistry::new();
        let a = open(&mut registry, "a");
        registry.close(a).unwrap();
        assert!(registry.close(a).is_none());
        assert!(matches!(
            registry.most_recent(),
            Err(DebugError::EmptyCollection { .. })
        ));
    }

    #[test]
    fn test_slots_are_reused() {
        let mut registry = ObserverRegistry::new();
        let a = open(&mut registry, "a");
        let _b = open(&mut registry, "b");
        registry.close(a).unwrap();
        let _c = open(&mut registry, "c");
        assert_eq!(registry.slots.len(), 2);
        assert_eq!(names(&registry), ["c", "b"]);
    }

    #[test]
    fn test_value_observer_aliases_storage() {
        let cell = Rc::new(RefCell::new(5i32));
        let observer = ValueObserver::new(Rc::clone(&cell));
        assert_eq!(observer.value(), "5");
        assert_eq!(observer.type_tag(), "i32");

        *cell.borrow_mut() = 6;
        assert_eq!(observer.value(), "6");
        assert!(observer.target_address().is_none());
        assert!(observer.deref_value().is_none());
    }

    #[test]
    fn test_pointer_observer() {
        let heap = Rc::new(Interceptor::default());
        let cell = Rc::new(RefCell::new(HeapPtr::<i32>::null()));
        let observer = PointerObserver::new(Rc::clone(&cell));

        assert_eq!(observer.type_tag(), "ptr");
        assert_eq!(observer.value(), "nullptr");
        assert_eq!(observer.target_address(), None);
        assert_eq!(observer.deref_value().as_deref(), Some("null"));

        let ptr = heap.allocate(9i32);
        let address = ptr.address();
        *cell.borrow_mut() = ptr;

        assert_eq!(observer.value(), format_address(address));
        assert_eq!(observer.target_address(), Some(address));
        assert_eq!(observer.deref_value().as_deref(), Some("9"));
        assert_eq!(heap.registry().get(address).unwrap().type_tag, "i32");
    }
}
