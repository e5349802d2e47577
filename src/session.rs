//! Debug session
//!
//! A [`DebugSession`] owns every piece of instrumentation state for one
//! observed program: the variable registry, the tracked heap, the call stack,
//! the output sink and the step driver. Creating the session is the init step;
//! [`DebugSession::teardown`] is the explicit end of its lifecycle.
//!
//! Instrumentation points map onto the API as follows:
//!
//! | observed program            | session call                       |
//! |-----------------------------|------------------------------------|
//! | function entry / exit       | [`DebugSession::enter`] guard      |
//! | variable declared / dropped | [`DebugSession::trace`] guard      |
//! | `new` / `delete`            | [`DebugSession::alloc`] / `free`   |
//! | step boundary               | [`DebugSession::emit_snapshot`]    |
//!
//! Execution alternates strictly between the program and the driver: the
//! session is `Running` until a step boundary, `Suspended` while the driver
//! holds it, and `Running` again once the driver answers with a line.

use crate::config::SessionConfig;
use crate::constants::{NO_TARGET, TEST_FAIL_PREFIX, TEST_PASS_PREFIX};
use crate::driver::StepDriver;
use crate::errors::Result;
use crate::memory::heap::{AllocationRecord, HeapPtr, Interceptor};
use crate::memory::observer::{
    Observe, ObservedVar, ObserverId, ObserverRegistry, PointerObserver, ValueObserver,
};
use crate::memory::stack::CallStack;
use crate::memory::value::Render;
use crate::memory::{format_address, Address};
use crate::snapshot::{Snapshot, SnapshotEntry};
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::io::Write;
use std::rc::{Rc, Weak};
use tracing::{debug, info, trace, warn};

/// Whether the observed program is executing or parked at a step boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Suspended,
}

struct SessionState {
    config: SessionConfig,
    heap: Rc<Interceptor>,
    vars: RefCell<ObserverRegistry>,
    stack: RefCell<CallStack>,
    driver: RefCell<Box<dyn StepDriver>>,
    out: RefCell<Box<dyn Write>>,
    run_state: Cell<RunState>,
    line: Cell<u32>,
    steps: Cell<u64>,
}

impl SessionState {
    fn close(&self, id: ObserverId) {
        match self.vars.try_borrow_mut() {
            Ok(mut vars) => {
                vars.close(id);
            }
            Err(_) => warn!(?id, "variable registry busy; observer left open"),
        }
    }

    fn pop_frame(&self) -> Result<String> {
        self.stack.borrow_mut().pop()
    }
}

/// Instrumentation state for one observed program
#[derive(Clone)]
pub struct DebugSession {
    state: Rc<SessionState>,
}

impl DebugSession {
    /// Start a session writing protocol text to `out`
    pub fn new(
        config: SessionConfig,
        driver: impl StepDriver + 'static,
        out: impl Write + 'static,
    ) -> Self {
        info!(
            depth_limit = config.enrich_depth_limit,
            "debug session started"
        );
        DebugSession {
            state: Rc::new(SessionState {
                heap: Rc::new(Interceptor::new(config.enrich_depth_limit)),
                config,
                vars: RefCell::new(ObserverRegistry::new()),
                stack: RefCell::new(CallStack::new()),
                driver: RefCell::new(Box::new(driver)),
                out: RefCell::new(Box::new(out)),
                run_state: Cell::new(RunState::Running),
                line: Cell::new(0),
                steps: Cell::new(0),
            }),
        }
    }

    /// Start a session with default settings writing to stdout
    pub fn with_stdout(driver: impl StepDriver + 'static) -> Self {
        Self::new(SessionConfig::default(), driver, std::io::stdout())
    }

    pub fn config(&self) -> &SessionConfig {
        &self.state.config
    }

    pub fn run_state(&self) -> RunState {
        self.state.run_state.get()
    }

    /// Line the driver last resumed at
    pub fn current_line(&self) -> u32 {
        self.state.line.get()
    }

    /// Number of completed suspend/resume cycles
    pub fn steps(&self) -> u64 {
        self.state.steps.get()
    }

    // === Call stack ===

    /// Enter an activation of `name`; it is exited when the guard drops
    pub fn enter(&self, name: &str) -> FrameGuard {
        let label = self.push_frame(name);
        FrameGuard {
            label,
            session: Rc::downgrade(&self.state),
        }
    }

    /// Push an activation and return its label
    pub fn push_frame(&self, name: &str) -> String {
        let label = self.state.stack.borrow_mut().push(name);
        trace!(%label, "frame entered");
        label
    }

    /// Pop the innermost activation
    pub fn pop_frame(&self) -> Result<String> {
        self.state.pop_frame()
    }

    /// Label variables declared right now are owned by
    pub fn current_frame(&self) -> String {
        self.state
            .stack
            .borrow()
            .current()
            .map_or_else(|| self.state.config.global_frame_label.clone(), str::to_string)
    }

    pub fn call_stack(&self) -> Ref<'_, CallStack> {
        self.state.stack.borrow()
    }

    // === Variables ===

    /// Declare an observed variable holding `value`
    pub fn trace<T: Render + 'static>(&self, name: &str, value: T) -> Traced<T> {
        self.observe(name, Rc::new(RefCell::new(value)))
    }

    /// Declare an observed pointer variable
    ///
    /// The target's heap record is enriched right away, and again every time
    /// the pointer is observed.
    pub fn trace_ptr<T: Render + 'static>(
        &self,
        name: &str,
        ptr: HeapPtr<T>,
    ) -> Traced<HeapPtr<T>> {
        ptr.enrich();
        let cell = Rc::new(RefCell::new(ptr));
        let observer = PointerObserver::new(Rc::clone(&cell));
        let id = self.open(name, Box::new(observer));
        Traced::new(cell, id, &self.state)
    }

    /// Observe a value that already lives in shared storage
    pub fn observe<T: Render + 'static>(&self, name: &str, cell: Rc<RefCell<T>>) -> Traced<T> {
        let observer = ValueObserver::new(Rc::clone(&cell));
        let id = self.open(name, Box::new(observer));
        Traced::new(cell, id, &self.state)
    }

    /// Second name for the storage behind `traced`, like a reference variable
    pub fn alias<T: Render + 'static>(&self, name: &str, traced: &Traced<T>) -> Traced<T> {
        self.observe(name, Rc::clone(&traced.cell))
    }

    /// Register an observer directly; pair with [`DebugSession::close`]
    pub fn open(&self, name: &str, observer: Box<dyn Observe>) -> ObserverId {
        let frame = self.current_frame();
        trace!(name, %frame, "variable opened");
        self.state.vars.borrow_mut().open(name, frame, observer)
    }

    /// Remove one observer, wherever it sits in the registry
    pub fn close(&self, id: ObserverId) -> Option<ObservedVar> {
        self.state.vars.borrow_mut().close(id)
    }

    pub fn variables(&self) -> Ref<'_, ObserverRegistry> {
        self.state.vars.borrow()
    }

    // === Heap ===

    /// Move `value` to the tracked heap
    pub fn alloc<T: Render + 'static>(&self, value: T) -> HeapPtr<T> {
        self.state.heap.allocate(value)
    }

    /// Move `values` to the tracked heap as one array block
    pub fn alloc_array<T: Render + 'static>(&self, values: Vec<T>) -> HeapPtr<Vec<T>> {
        self.state.heap.allocate_array(values)
    }

    /// Release the block `ptr` targets
    pub fn free<T>(&self, ptr: HeapPtr<T>) {
        self.state.heap.free(ptr)
    }

    /// Allocate `size` raw bytes
    pub fn alloc_bytes(&self, size: usize) -> Address {
        self.state.heap.allocate_bytes(size, false)
    }

    /// Release raw bytes; unknown addresses are ignored
    pub fn free_bytes(&self, address: Address) {
        self.state.heap.deallocate(address)
    }

    /// Refine a heap record with information from typed code
    pub fn enrich(&self, address: Address, type_tag: &str, value: String) {
        self.state.heap.enrich_with(address, type_tag, || value)
    }

    pub fn heap(&self) -> &Rc<Interceptor> {
        &self.state.heap
    }

    // === Stepping ===

    /// Compose a snapshot of the current state
    ///
    /// Variables are rendered first so that heap records reflect any
    /// enrichment their pointers trigger.
    pub fn snapshot(&self) -> Snapshot {
        let variables: Vec<SnapshotEntry> = {
            let vars = self.state.vars.borrow();
            vars.iter().map(variable_entry).collect()
        };

        let heap_label = &self.state.config.heap_frame_label;
        let heap = self
            .state
            .heap
            .records()
            .iter()
            .map(|record| SnapshotEntry::from_record(record, heap_label))
            .collect();

        let frames = self.state.stack.borrow().frames().to_vec();

        Snapshot {
            variables,
            heap,
            frames,
        }
    }

    /// Write a snapshot, suspend, and resume once the driver answers
    pub fn emit_snapshot(&self, line: u32) -> Result<u32> {
        let snapshot = self.snapshot();
        snapshot.write_to(&mut **self.state.out.borrow_mut())?;
        debug!(
            line,
            variables = snapshot.variables.len(),
            heap = snapshot.heap.len(),
            frames = snapshot.frames.len(),
            "snapshot emitted"
        );

        self.state.run_state.set(RunState::Suspended);
        let resumed = {
            let mut driver = self.driver_mut();
            driver
                .observe(&snapshot)
                .and_then(|()| driver.wait(line))
        };
        self.state.run_state.set(RunState::Running);

        let next = resumed?;
        self.state.line.set(next);
        self.state.steps.set(self.state.steps.get() + 1);
        debug!(line, next, "resumed");
        Ok(next)
    }

    /// Step at a loop header with the loop variable briefly in view
    ///
    /// The variable is observed through its own storage, and only for the
    /// duration of this step.
    pub fn emit_loop_step<T: Render + 'static>(
        &self,
        line: u32,
        name: &str,
        var: &Rc<RefCell<T>>,
    ) -> Result<u32> {
        let _var = self.observe(name, Rc::clone(var));
        self.emit_snapshot(line)
    }

    /// Tell the driver execution reached `line` without suspending
    pub fn line_changed(&self, line: u32) {
        self.state.line.set(line);
        self.driver_mut().line_changed(line);
    }

    fn driver_mut(&self) -> RefMut<'_, Box<dyn StepDriver>> {
        self.state.driver.borrow_mut()
    }

    // === Output ===

    /// Write one line of program output between snapshots
    pub fn print(&self, text: &str) -> Result<()> {
        let mut out = self.state.out.borrow_mut();
        writeln!(out, "{}", text)?;
        out.flush()?;
        Ok(())
    }

    /// Report one equality check; used by [`expect_equal!`](crate::expect_equal)
    pub fn report_check(
        &self,
        passed: bool,
        actual_expr: &str,
        expected_expr: &str,
        actual: &str,
        expected: &str,
    ) -> Result<bool> {
        let line = if passed {
            format!("{} {} == {}", TEST_PASS_PREFIX, actual_expr, expected_expr)
        } else {
            format!(
                "{} {} == {} Expected: {} Actual: {}",
                TEST_FAIL_PREFIX, actual_expr, expected_expr, expected, actual
            )
        };
        self.print(&line)?;
        Ok(passed)
    }

    // === Lifecycle ===

    /// End the session: drop every observer and frame and return the heap
    /// records that were never freed
    pub fn teardown(&self) -> Vec<AllocationRecord> {
        let leaked = self.state.heap.records();
        if !leaked.is_empty() {
            info!(count = leaked.len(), "heap blocks never freed");
        }

        self.state.vars.borrow_mut().clear();
        self.state.stack.borrow_mut().clear();
        self.state.heap.clear();
        if let Err(err) = self.state.out.borrow_mut().flush() {
            warn!(error = %err, "flushing protocol output failed");
        }
        leaked
    }
}

fn variable_entry(var: &ObservedVar) -> SnapshotEntry {
    let observer = &var.observer;
    SnapshotEntry {
        name: var.name.clone(),
        type_tag: observer.type_tag(),
        address: format_address(observer.address()),
        value: observer.value(),
        target: observer
            .target_address()
            .map_or_else(|| NO_TARGET.to_string(), format_address),
        frame: var.frame.clone(),
        deref: observer.deref_value().unwrap_or_default(),
    }
}

/// An activation on the call stack; popped when dropped
#[must_use = "the frame is popped as soon as the guard is dropped"]
pub struct FrameGuard {
    label: String,
    session: Weak<SessionState>,
}

impl FrameGuard {
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        if let Some(state) = self.session.upgrade() {
            match state.pop_frame() {
                Ok(label) => trace!(%label, "frame exited"),
                Err(err) => warn!(error = %err, label = %self.label, "frame already gone"),
            }
        }
    }
}

/// An observed variable; its observer is closed when it is dropped
///
/// The value lives in shared storage that the observer aliases, so changes
/// made through [`Traced::get_mut`] show up in the next snapshot.
#[must_use = "the variable stops being observed as soon as it is dropped"]
pub struct Traced<T> {
    cell: Rc<RefCell<T>>,
    id: ObserverId,
    session: Weak<SessionState>,
}

impl<T> Traced<T> {
    fn new(cell: Rc<RefCell<T>>, id: ObserverId, state: &Rc<SessionState>) -> Self {
        Traced {
            cell,
            id,
            session: Rc::downgrade(state),
        }
    }

    pub fn id(&self) -> ObserverId {
        self.id
    }

    pub fn get(&self) -> Ref<'_, T> {
        self.cell.borrow()
    }

    pub fn get_mut(&self) -> RefMut<'_, T> {
        self.cell.borrow_mut()
    }

    pub fn set(&self, value: T) {
        *self.cell.borrow_mut() = value;
    }

    /// Apply `f` to the value in place
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.cell.borrow_mut());
    }

    /// Shared storage behind this variable
    pub fn cell(&self) -> &Rc<RefCell<T>> {
        &self.cell
    }
}

impl<T: Clone> Traced<T> {
    pub fn value(&self) -> T {
        self.cell.borrow().clone()
    }
}

impl<T> Drop for Traced<T> {
    fn drop(&mut self) {
        if let Some(state) = self.session.upgrade() {
            state.close(self.id);
        }
    }
}
