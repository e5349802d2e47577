// Bundled practice programs, instrumented by hand
//
// Each function is written the way the source transformation instruments a
// practice exercise: a frame guard per function, a traced variable per
// declaration, and a step boundary before each statement.

use std::cell::RefCell;
use std::rc::Rc;

use stepview::errors::{OrAbort, Result};
use stepview::{expect_equal, impl_render, DebugRender, DebugSession, HeapPtr, Render};

// === heap: a leaked int and a two-node list ===

struct Node {
    val: i32,
    next: HeapPtr<Node>,
}

impl DebugRender for Node {
    fn debug_render(&self) -> String {
        format!(
            "{{\"val\": {}, \"next\": {}}}",
            self.val.render(),
            self.next.render()
        )
    }
}

impl_render!(Node);

fn not_so_helpful_helper(session: &DebugSession) -> Result<i32> {
    let _frame = session.enter("not_so_helpful_helper");
    session.emit_snapshot(9)?;
    let _p = session.trace_ptr("p", session.alloc(42i32));
    // p goes out of scope but its block stays on the heap
    session.emit_snapshot(12)?;
    Ok(1)
}

pub fn heap(session: &DebugSession) -> Result<()> {
    let _frame = session.enter("main");
    session.emit_snapshot(17)?;
    not_so_helpful_helper(session)?;

    session.emit_snapshot(19)?;
    let list = session.trace_ptr(
        "list",
        session.alloc(Node {
            val: 0,
            next: HeapPtr::null(),
        }),
    );

    session.emit_snapshot(20)?;
    let head = list.value();
    head.borrow_mut().or_abort().val = 1;

    session.emit_snapshot(21)?;
    let second = session.alloc(Node {
        val: 0,
        next: HeapPtr::null(),
    });
    head.borrow_mut().or_abort().next = second.clone();

    session.emit_snapshot(22)?;
    second.borrow_mut().or_abort().val = 2;

    session.emit_snapshot(23)?;
    second.borrow_mut().or_abort().next = HeapPtr::null();

    session.emit_snapshot(25)?;
    session.print("Check Heap Visualization")?;

    session.emit_snapshot(27)?;
    Ok(())
}

// === recursion: reversing a string ===

fn reverse_of(session: &DebugSession, text: &str) -> Result<String> {
    let _frame = session.enter("reverse_of");
    let s = session.trace("s", text.to_string());
    session.emit_snapshot(4)?;

    if s.get().is_empty() {
        session.emit_snapshot(5)?;
        return Ok(String::new());
    }

    session.emit_snapshot(7)?;
    let (first, rest) = {
        let text = s.get();
        let mut chars = text.chars();
        let first = chars.next();
        (first, chars.as_str().to_string())
    };
    let mut reversed = reverse_of(session, &rest)?;
    reversed.extend(first);
    Ok(reversed)
}

pub fn recursion(session: &DebugSession) -> Result<()> {
    let _frame = session.enter("main");
    session.emit_snapshot(12)?;
    session.print("Tracing reverse_of(\"stop\")")?;

    session.emit_snapshot(14)?;
    let result = session.trace("result", reverse_of(session, "stop")?);

    session.emit_snapshot(15)?;
    session.print(&format!("Result: {}", result.get()))?;

    for (word, expected) in [
        ("stop", "pots"),
        ("", ""),
        ("a", "a"),
        ("hello", "olleh"),
        ("recursion", "noisrucer"),
    ] {
        session.emit_snapshot(18)?;
        let reversed = reverse_of(session, word)?;
        expect_equal!(session, reversed, expected)?;
    }
    Ok(())
}

// === references: by-value parameters versus aliases ===

fn shifted(c: char) -> char {
    char::from_u32(c as u32 + 2).unwrap_or(c)
}

fn shift_all(text: &mut String) {
    *text = text.chars().map(shifted).collect();
}

fn maui(session: &DebugSession, value: String) -> Result<()> {
    let _frame = session.enter("maui");
    let s = session.trace("s", value);
    let len = s.get().chars().count();
    let i = Rc::new(RefCell::new(0usize));
    for k in 0..len {
        *i.borrow_mut() = k;
        session.emit_loop_step(4, "i", &i)?;
        s.update(|text| {
            let mut chars: Vec<char> = text.chars().collect();
            chars[k] = shifted(chars[k]);
            *text = chars.into_iter().collect();
        });
    }
    Ok(())
}

fn sina(session: &DebugSession, target: &stepview::Traced<String>) -> Result<()> {
    let _frame = session.enter("sina");
    let s = session.alias("s", target);
    session.emit_snapshot(10)?;
    s.update(shift_all);
    session.emit_snapshot(12)?;
    Ok(())
}

fn te_fiti(session: &DebugSession, target: &stepview::Traced<String>) -> Result<String> {
    let _frame = session.enter("te_fiti");
    let _s = session.alias("s", target);
    let result = session.trace("result", String::new());
    let text = target.value();
    let ch = Rc::new(RefCell::new(' '));
    for c in text.chars() {
        *ch.borrow_mut() = c;
        session.emit_loop_step(29, "ch", &ch)?;
        result.get_mut().push(shifted(c));
    }
    session.emit_snapshot(32)?;
    Ok(result.value())
}

pub fn references(session: &DebugSession) -> Result<()> {
    let _frame = session.enter("main");
    session.emit_snapshot(36)?;
    let s = session.trace("s", String::from("umm"));

    session.emit_snapshot(38)?;
    maui(session, s.value())?;
    session.print(&s.value())?;

    session.emit_snapshot(41)?;
    sina(session, &s)?;
    session.print(&s.value())?;

    session.emit_snapshot(50)?;
    te_fiti(session, &s)?;
    session.print(&s.value())?;

    session.emit_snapshot(53)?;
    Ok(())
}
