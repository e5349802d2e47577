// Integration tests for the snapshot/step protocol

use pretty_assertions::assert_eq;
use std::cell::RefCell;
use std::rc::Rc;
use stepview::driver::{AutoDriver, RecordingDriver, ScriptedDriver, StepDriver};
use stepview::memory::format_address;
use stepview::snapshot::CapturedOutput;
use stepview::{
    impl_render, DebugRender, DebugSession, HeapPtr, Render, RunState, SessionConfig, Snapshot,
};

fn session() -> (DebugSession, CapturedOutput) {
    let out = CapturedOutput::new();
    let session = DebugSession::new(SessionConfig::default(), AutoDriver::new(), out.clone());
    (session, out)
}

fn last_snapshot(out: &CapturedOutput) -> Snapshot {
    out.snapshots()
        .expect("protocol output should decode")
        .pop()
        .expect("at least one snapshot")
}

struct Node {
    val: i32,
    next: HeapPtr<Node>,
}

impl DebugRender for Node {
    fn debug_render(&self) -> String {
        format!("{{\"val\": {}, \"next\": {}}}", self.val, self.next.render())
    }
}

impl_render!(Node);

#[test]
fn test_end_to_end_variable_and_heap_lifecycle() {
    let (session, out) = session();

    let x = session.trace("x", 5i32);
    session.emit_snapshot(1).unwrap();
    let snapshot = last_snapshot(&out);
    assert_eq!(snapshot.variables.len(), 1);
    assert_eq!(snapshot.variables[0].name, "x");
    assert_eq!(snapshot.variables[0].value, "5");
    assert!(snapshot.heap.is_empty());

    let address = session.alloc_bytes(4);
    session.emit_snapshot(2).unwrap();
    let snapshot = last_snapshot(&out);
    assert_eq!(snapshot.heap.len(), 1);
    assert_eq!(snapshot.heap[0].address, format_address(address));
    assert_eq!(snapshot.heap[0].value, "Allocated (4 bytes)");

    session.free_bytes(address);
    session.emit_snapshot(3).unwrap();
    assert!(last_snapshot(&out).heap.is_empty());

    drop(x);
    session.emit_snapshot(4).unwrap();
    let snapshot = last_snapshot(&out);
    assert!(snapshot.variables.is_empty());
    assert!(snapshot.heap.is_empty());

    assert_eq!(out.snapshots().unwrap().len(), 4);
    assert_eq!(session.steps(), 4);
}

#[test]
fn test_exact_wire_format() {
    let (session, out) = session();
    let _main = session.enter("main");
    let flag = session.trace("flag", true);
    let address = format_address(Rc::as_ptr(flag.cell()) as *const () as usize as u64);

    session.emit_snapshot(7).unwrap();

    let expected = format!(
        "[DEBUG:VARS:START]\n\
         flag|bool|{address}|true|0|main|\n\
         [DEBUG:VARS:END]\n\
         [DEBUG:STACK:START]\n\
         main\n\
         [DEBUG:STACK:END]\n"
    );
    assert_eq!(out.text(), expected);
}

#[test]
fn test_variables_listed_most_recent_first_with_frames() {
    let (session, out) = session();
    let _g = session.trace("counter", 0u32);
    let _main = session.enter("main");
    let _a = session.trace("a", 1);
    let _helper = session.enter("helper");
    let _b = session.trace("b", "two");

    session.emit_snapshot(1).unwrap();
    let snapshot = last_snapshot(&out);

    let summary: Vec<(String, String, String)> = snapshot
        .variables
        .iter()
        .map(|v| (v.name.clone(), v.frame.clone(), v.value.clone()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("b".to_string(), "helper".to_string(), "\"two\"".to_string()),
            ("a".to_string(), "main".to_string(), "1".to_string()),
            ("counter".to_string(), "global".to_string(), "0".to_string()),
        ]
    );
    assert_eq!(snapshot.frames, ["main", "helper"]);
}

#[test]
fn test_recursive_frames_in_snapshot() {
    fn descend(session: &DebugSession, out: &CapturedOutput, depth: u32) {
        let _frame = session.enter("f");
        let _n = session.trace("n", depth);
        if depth < 3 {
            descend(session, out, depth + 1);
        } else {
            session.emit_snapshot(10).unwrap();
            let snapshot = last_snapshot(out);
            assert_eq!(snapshot.frames, ["f", "f (2)", "f (3)"]);
            assert_eq!(snapshot.variables[0].frame, "f (3)");
            assert_eq!(snapshot.variables[2].frame, "f");
        }
    }

    let (session, out) = session();
    descend(&session, &out, 1);
    assert!(session.call_stack().is_empty());
    assert!(session.variables().is_empty());

    // After the innermost call returns, its label is gone
    let _outer = session.enter("f");
    let _middle = session.enter("f");
    let inner = session.enter("f");
    assert_eq!(inner.label(), "f (3)");
    drop(inner);
    assert_eq!(session.call_stack().frames(), ["f", "f (2)"]);
}

#[test]
fn test_pointer_observation_enriches_heap() {
    let (session, out) = session();
    let _main = session.enter("main");

    let ptr = session.alloc(42i32);
    let target = format_address(ptr.address());
    let p = session.trace_ptr("p", ptr);

    session.emit_snapshot(3).unwrap();
    let snapshot = last_snapshot(&out);

    let var = snapshot.variable("p").unwrap();
    assert_eq!(var.type_tag, "ptr");
    assert_eq!(var.value, target);
    assert_eq!(var.target, target);
    assert_eq!(var.deref, "42");

    let record = snapshot.heap_record(&target).unwrap();
    assert_eq!(record.name, format!("*{}", target));
    assert_eq!(record.type_tag, "i32");
    assert_eq!(record.value, "42");
    assert_eq!(record.deref, "42");
    assert_eq!(record.target, "0");
    assert_eq!(record.frame, "heap");

    // Writes through the pointer show up in the next snapshot
    *p.value().borrow_mut().unwrap() = 43;
    session.emit_snapshot(4).unwrap();
    let snapshot = last_snapshot(&out);
    assert_eq!(snapshot.variable("p").unwrap().deref, "43");
    assert_eq!(snapshot.heap_record(&target).unwrap().value, "43");
}

#[test]
fn test_null_pointer_fields() {
    let (session, out) = session();
    let _p = session.trace_ptr("p", HeapPtr::<i32>::null());
    session.emit_snapshot(1).unwrap();
    let snapshot = last_snapshot(&out);
    let var = snapshot.variable("p").unwrap();
    assert_eq!(var.value, "nullptr");
    assert_eq!(var.target, "0");
    assert_eq!(var.deref, "null");
}

#[test]
fn test_linked_list_enrichment_reaches_every_node() {
    let (session, out) = session();
    let tail = session.alloc(Node {
        val: 2,
        next: HeapPtr::null(),
    });
    let head = session.alloc(Node {
        val: 1,
        next: tail.clone(),
    });
    let tail_address = format_address(tail.address());
    let _list = session.trace_ptr("list", head);

    session.emit_snapshot(1).unwrap();
    let snapshot = last_snapshot(&out);

    assert_eq!(snapshot.heap.len(), 2);
    let tail_record = snapshot.heap_record(&tail_address).unwrap();
    assert_eq!(tail_record.type_tag, "Node");
    assert_eq!(tail_record.value, "{\"val\": 2, \"next\": null}");
    let list = snapshot.variable("list").unwrap();
    assert_eq!(
        list.deref,
        format!("{{\"val\": 1, \"next\": \"{}\"}}", tail_address)
    );
}

#[test]
fn test_cyclic_structure_terminates() {
    let config = SessionConfig::new().with_enrich_depth_limit(8);
    let out = CapturedOutput::new();
    let session = DebugSession::new(config, AutoDriver::new(), out.clone());

    let a = session.alloc(Node {
        val: 1,
        next: HeapPtr::null(),
    });
    let b = session.alloc(Node {
        val: 2,
        next: a.clone(),
    });
    a.borrow_mut().unwrap().next = b.clone();

    let _a = session.trace_ptr("a", a.clone());
    session.emit_snapshot(1).unwrap();
    assert_eq!(last_snapshot(&out).heap.len(), 2);
    assert_eq!(session.heap().enrich_depth(), 0);

    a.borrow_mut().unwrap().next = HeapPtr::null();
}

#[test]
fn test_alias_shares_storage() {
    let (session, out) = session();
    let s = session.trace("s", String::from("umm"));
    {
        let _frame = session.enter("sina");
        let alias = session.alias("s", &s);
        alias.set(String::from("woo"));
        session.emit_snapshot(5).unwrap();

        let snapshot = last_snapshot(&out);
        assert_eq!(snapshot.variables.len(), 2);
        assert_eq!(snapshot.variables[0].address, snapshot.variables[1].address);
        assert!(snapshot.variables.iter().all(|v| v.value == "\"woo\""));
    }
    assert_eq!(s.value(), "woo");
    assert_eq!(session.variables().len(), 1);
}

#[test]
fn test_out_of_order_drop() {
    let (session, out) = session();
    let a = session.trace("a", 1);
    let b = session.trace("b", 2);
    let c = session.trace("c", 3);
    drop(b);

    session.emit_snapshot(1).unwrap();
    let names: Vec<String> = last_snapshot(&out)
        .variables
        .into_iter()
        .map(|v| v.name)
        .collect();
    assert_eq!(names, ["c", "a"]);
    drop(a);
    drop(c);
    assert!(session.variables().is_empty());
}

#[test]
fn test_resume_lines_and_run_state() {
    let out = CapturedOutput::new();
    let session = DebugSession::new(
        SessionConfig::default(),
        ScriptedDriver::new([40, 41]),
        out.clone(),
    );

    assert_eq!(session.run_state(), RunState::Running);
    assert_eq!(session.emit_snapshot(10).unwrap(), 40);
    assert_eq!(session.current_line(), 40);
    assert_eq!(session.emit_snapshot(11).unwrap(), 41);
    assert_eq!(session.emit_snapshot(12).unwrap(), 12);
    assert_eq!(session.run_state(), RunState::Running);

    session.line_changed(13);
    assert_eq!(session.current_line(), 13);
}

#[test]
fn test_driver_closing_surfaces_as_error() {
    let out = CapturedOutput::new();
    let session = DebugSession::new(
        SessionConfig::default(),
        AutoDriver::with_max_steps(1),
        out.clone(),
    );
    session.emit_snapshot(1).unwrap();
    let err = session.emit_snapshot(2).unwrap_err();
    assert!(matches!(err, stepview::DebugError::DriverClosed { line: 2 }));
    assert_eq!(session.run_state(), RunState::Running);
    // The snapshot was still written before the driver refused to resume
    assert_eq!(out.snapshots().unwrap().len(), 2);
}

#[test]
fn test_recording_driver_replays_steps() {
    let driver = RecordingDriver::new(AutoDriver::new(), 1024 * 1024);
    let history = driver.history();
    let out = CapturedOutput::new();
    let session = DebugSession::new(SessionConfig::default(), driver, out);

    let x = session.trace("x", 1);
    session.emit_snapshot(1).unwrap();
    x.set(2);
    session.emit_snapshot(2).unwrap();

    let history = history.borrow();
    assert_eq!(history.len(), 2);
    assert_eq!(history.get(0).unwrap().variable("x").unwrap().value, "1");
    assert_eq!(history.get(1).unwrap().variable("x").unwrap().value, "2");
}

#[test]
fn test_loop_step_shows_transient_variable() {
    let (session, out) = session();
    let _main = session.enter("main");
    let i = Rc::new(RefCell::new(0u8));
    for k in 0..2u8 {
        *i.borrow_mut() = k;
        session.emit_loop_step(3, "i", &i).unwrap();
    }
    let snapshots = out.snapshots().unwrap();
    assert_eq!(snapshots.len(), 2);

    // Both steps show the loop variable's own storage, not a copy
    let own_address = format_address(Rc::as_ptr(&i) as *const () as usize as u64);
    for snapshot in &snapshots {
        assert_eq!(snapshot.variable("i").unwrap().address, own_address);
    }
    assert_eq!(snapshots[1].variable("i").unwrap().value, "1");
    assert!(session.variables().is_empty());
}

#[test]
fn test_line_changed_reaches_driver_without_suspending() {
    let driver = ScriptedDriver::default();
    let changes = Rc::new(RefCell::new(Vec::new()));

    struct Spy {
        inner: ScriptedDriver,
        changes: Rc<RefCell<Vec<u32>>>,
    }

    impl StepDriver for Spy {
        fn wait(&mut self, line: u32) -> stepview::Result<u32> {
            self.inner.wait(line)
        }

        fn line_changed(&mut self, line: u32) {
            self.inner.line_changed(line);
            *self.changes.borrow_mut() = self.inner.changes().to_vec();
        }
    }

    let out = CapturedOutput::new();
    let session = DebugSession::new(
        SessionConfig::default(),
        Spy {
            inner: driver,
            changes: Rc::clone(&changes),
        },
        out.clone(),
    );

    session.line_changed(21);
    session.line_changed(22);

    assert_eq!(*changes.borrow(), [21, 22]);
    assert_eq!(session.current_line(), 22);
    assert_eq!(session.steps(), 0);
    assert_eq!(session.run_state(), RunState::Running);
    assert!(out.text().is_empty());
}

#[test]
fn test_leaked_blocks_stay_recorded_after_last_pointer_drops() {
    let (session, out) = session();
    let _main = session.enter("main");

    for i in 0..50i32 {
        let _p = session.trace_ptr("p", session.alloc(i));
        session.emit_snapshot(5).unwrap();
    }

    // Every block was leaked, none may be recycled or forgotten
    assert_eq!(session.heap().records().len(), 50);
    for (step, snapshot) in out.snapshots().unwrap().iter().enumerate() {
        assert_eq!(snapshot.heap.len(), step + 1);
    }

    let leaked = session.teardown();
    assert_eq!(leaked.len(), 50);
    assert!(leaked.iter().all(|record| record.type_tag == "i32"));
}

#[test]
fn test_teardown_reports_leaks() {
    let (session, _out) = session();
    let kept = session.alloc(String::from("leak"));
    let freed = session.alloc(7i32);
    session.free(freed);

    kept.enrich();
    let leaked = session.teardown();
    assert_eq!(leaked.len(), 1);
    assert_eq!(leaked[0].type_tag, "String");
    assert_eq!(leaked[0].value, "\"leak\"");
    assert!(session.heap().records().is_empty());
}

#[test]
fn test_program_output_between_snapshots() {
    let (session, out) = session();
    session.print("hello").unwrap();
    session.emit_snapshot(1).unwrap();
    stepview::expect_equal!(session, 1 + 1, 2).unwrap();

    let lines = out.lines();
    assert_eq!(lines[0], "hello");
    assert_eq!(lines.last().unwrap(), "[TEST:PASS] 1 + 1 == 2");
    assert_eq!(out.snapshots().unwrap().len(), 1);
}
