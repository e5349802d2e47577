//! Call stack tracking
//!
//! Each activation is identified by a label derived from its function name.
//! When the same function is already active, the new activation is labelled
//! `name (k)` where `k` is one more than the number of live activations of
//! `name`, so three nested calls to `f` read `f`, `f (2)`, `f (3)`.
//!
//! Activations are always properly nested, so popping needs no search.

use crate::errors::{DebugError, Result};

/// The call stack, outermost activation first
#[derive(Debug, Clone, Default)]
pub struct CallStack {
    frames: Vec<String>,
}

impl CallStack {
    pub fn new() -> Self {
        CallStack { frames: Vec::new() }
    }

    /// Push an activation of `name` and return its label
    pub fn push(&mut self, name: &str) -> String {
        let live = self
            .frames
            .iter()
            .filter(|label| is_activation_of(label, name))
            .count();

        let label = if live == 0 {
            name.to_string()
        } else {
            format!("{} ({})", name, live + 1)
        };

        self.frames.push(label.clone());
        label
    }

    /// Pop the innermost activation
    pub fn pop(&mut self) -> Result<String> {
        self.frames.pop().ok_or(DebugError::EmptyCollection {
            what: "call stack",
            op: "pop",
        })
    }

    /// Label of the innermost activation
    pub fn top(&self) -> Result<&str> {
        self.frames
            .last()
            .map(String::as_str)
            .ok_or(DebugError::EmptyCollection {
                what: "call stack",
                op: "top",
            })
    }

    /// Innermost label, if any activation is live
    pub fn current(&self) -> Option<&str> {
        self.frames.last().map(String::as_str)
    }

    /// All labels, outermost first
    pub fn frames(&self) -> &[String] {
        &self.frames
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

/// Whether `label` is `name` itself or `name (k)`
fn is_activation_of(label: &str, name: &str) -> bool {
    if label == name {
        return true;
    }
    label
        .strip_prefix(name)
        .and_then(|rest| rest.strip_prefix(" ("))
        .and_then(|rest| rest.strip_suffix(')'))
        .is_some_and(|k| !k.is_empty() && k.bytes().all(|b| b.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recursive_labels() {
        let mut stack = CallStack::new();
        assert_eq!(stack.push("f"), "f");
        assert_eq!(stack.push("f"), "f (2)");
        assert_eq!(stack.push("f"), "f (3)");
        assert_eq!(stack.frames(), ["f", "f (2)", "f (3)"]);

        assert_eq!(stack.pop().unwrap(), "f (3)");
        assert_eq!(stack.frames(), ["f", "f (2)"]);
    }

    #[test]
    fn test_interleaved_functions() {
        let mut stack = CallStack::new();
        stack.push("main");
        stack.push("f");
        stack.push("g");
        assert_eq!(stack.push("f"), "f (2)");
        assert_eq!(stack.push("g"), "g (2)");
        assert_eq!(stack.top().unwrap(), "g (2)");
    }

    #[test]
    fn test_prefix_names_are_distinct() {
        let mut stack = CallStack::new();
        stack.push("f");
        assert_eq!(stack.push("fib"), "fib");
        assert_eq!(stack.push("f"), "f (2)");
        assert_eq!(stack.push("fib"), "fib (2)");
    }

    #[test]
    fn test_label_reused_after_return() {
        let mut stack = CallStack::new();
        stack.push("f");
        stack.push("f");
        stack.pop().unwrap();
        assert_eq!(stack.push("f"), "f (2)");
    }

    #[test]
    fn test_empty_queries_fail() {
        let mut stack = CallStack::new();
        assert!(stack.current().is_none());
        assert!(matches!(
            stack.top(),
            Err(DebugError::EmptyCollection { op: "top", .. })
        ));
        assert!(matches!(
            stack.pop(),
            Err(DebugError::EmptyCollection { op: "pop", .. })
        ));
    }

    #[test]
    fn test_activation_matching() {
        assert!(is_activation_of("f", "f"));
        assert!(is_activation_of("f (12)", "f"));
        assert!(!is_activation_of("f ()", "f"));
        assert!(!is_activation_of("f (x)", "f"));
        assert!(!is_activation_of("fo", "f"));
    }
}
