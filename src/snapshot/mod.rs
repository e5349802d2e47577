// Snapshot model and wire protocol

use crate::constants::{
    FIELD_COUNT, FIELD_SEPARATOR, HEAP_NAME_PREFIX, NO_TARGET, STACK_END, STACK_START, VARS_END,
    VARS_START,
};
use crate::errors::{DebugError, Result};
use crate::memory::heap::AllocationRecord;
use crate::memory::format_address;
use std::cell::RefCell;
use std::fmt;
use std::io::{self, Write};
use std::rc::Rc;

/// One pipe-delimited line of the variables section
///
/// Field order on the wire: name, type, address, value, target, frame, deref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub name: String,
    pub type_tag: String,
    pub address: String,
    pub value: String,
    /// Pointer target, `0` for anything else
    pub target: String,
    pub frame: String,
    /// Dereferenced value; empty for non-pointers
    pub deref: String,
}

impl SnapshotEntry {
    /// Entry for a live heap record
    pub fn from_record(record: &AllocationRecord, heap_label: &str) -> Self {
        let address = format_address(record.address);
        SnapshotEntry {
            name: record.name(),
            type_tag: record.type_tag.clone(),
            address,
            value: record.value.clone(),
            target: NO_TARGET.to_string(),
            frame: heap_label.to_string(),
            deref: record.value.clone(),
        }
    }

    /// Whether this line describes a heap record rather than a variable
    pub fn is_heap(&self) -> bool {
        self.name.starts_with(HEAP_NAME_PREFIX)
    }

    /// Whether the entry points somewhere
    pub fn has_target(&self) -> bool {
        self.target != NO_TARGET
    }

    /// Decode one line. The last field keeps any further separators.
    pub fn parse(line: &str, line_number: usize) -> Result<Self> {
        let fields: Vec<&str> = line.splitn(FIELD_COUNT, FIELD_SEPARATOR).collect();
        if fields.len() != FIELD_COUNT {
            return Err(DebugError::MalformedSnapshot {
                line: line_number,
                message: format!("expected {} fields, found {}", FIELD_COUNT, fields.len()),
            });
        }

        Ok(SnapshotEntry {
            name: fields[0].to_string(),
            type_tag: fields[1].to_string(),
            address: fields[2].to_string(),
            value: fields[3].to_string(),
            target: fields[4].to_string(),
            frame: fields[5].to_string(),
            deref: fields[6].to_string(),
        })
    }
}

impl fmt::Display for SnapshotEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = FIELD_SEPARATOR;
        write!(
            f,
            "{}{sep}{}{sep}{}{sep}{}{sep}{}{sep}{}{sep}{}",
            self.name, self.type_tag, self.address, self.value, self.target, self.frame, self.deref
        )
    }
}

/// Point-in-time view of the observed program
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Live variables, most recently declared first
    pub variables: Vec<SnapshotEntry>,
    /// Live heap records
    pub heap: Vec<SnapshotEntry>,
    /// Call stack labels, outermost first
    pub frames: Vec<String>,
}

impl Snapshot {
    pub fn variable(&self, name: &str) -> Option<&SnapshotEntry> {
        self.variables.iter().find(|entry| entry.name == name)
    }

    pub fn heap_record(&self, address: &str) -> Option<&SnapshotEntry> {
        self.heap.iter().find(|entry| entry.address == address)
    }

    /// Write the protocol text
    pub fn write_to(&self, out: &mut dyn Write) -> io::Result<()> {
        write!(out, "{}", self)?;
        out.flush()
    }

    /// Rough memory footprint in bytes
    pub fn estimated_size(&self) -> usize {
        let entry_size = |entry: &SnapshotEntry| {
            entry.name.len()
                + entry.type_tag.len()
                + entry.address.len()
                + entry.value.len()
                + entry.target.len()
                + entry.frame.len()
                + entry.deref.len()
        };

        let entries: usize = self
            .variables
            .iter()
            .chain(self.heap.iter())
            .map(entry_size)
            .sum();
        let frames: usize = self.frames.iter().map(String::len).sum();

        std::mem::size_of::<Self>() + entries + frames
    }

    /// Decode protocol text produced by [`Snapshot::write_to`]
    pub fn parse(text: &str) -> Result<Self> {
        #[derive(Clone, Copy, PartialEq)]
        enum Section {
            Outside,
            Vars,
            Stack,
        }

        let mut snapshot = Snapshot::default();
        let mut section = Section::Outside;
        let mut saw_vars = false;
        let mut saw_stack = false;

        for (index, line) in text.lines().enumerate() {
            let line_number = index + 1;
            let malformed = |message: &str| DebugError::MalformedSnapshot {
                line: line_number,
                message: message.to_string(),
            };

            match (section, line) {
                (Section::Outside, VARS_START) => {
                    section = Section::Vars;
                    saw_vars = true;
                }
                (Section::Outside, STACK_START) => {
                    section = Section::Stack;
                    saw_stack = true;
                }
                (Section::Outside, "") => {}
                (Section::Outside, _) => return Err(malformed("text outside of a section")),
                (Section::Vars, VARS_END) | (Section::Stack, STACK_END) => {
                    section = Section::Outside;
                }
                (Section::Vars, _) => {
                    let entry = SnapshotEntry::parse(line, line_number)?;
                    if entry.is_heap() {
                        snapshot.heap.push(entry);
                    } else {
                        snapshot.variables.push(entry);
                    }
                }
                (Section::Stack, _) => snapshot.frames.push(line.to_string()),
            }
        }

        if section != Section::Outside {
            return Err(DebugError::MalformedSnapshot {
                line: text.lines().count(),
                message: "unterminated section".to_string(),
            });
        }
        if !saw_vars || !saw_stack {
            return Err(DebugError::MalformedSnapshot {
                line: 0,
                message: "missing variables or stack section".to_string(),
            });
        }

        Ok(snapshot)
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", VARS_START)?;
        for entry in self.variables.iter().chain(self.heap.iter()) {
            writeln!(f, "{}", entry)?;
        }
        writeln!(f, "{}", VARS_END)?;

        writeln!(f, "{}", STACK_START)?;
        for frame in &self.frames {
            writeln!(f, "{}", frame)?;
        }
        writeln!(f, "{}", STACK_END)
    }
}

/// Bounded history of snapshots for replay
#[derive(Debug)]
pub struct SnapshotHistory {
    snapshots: Vec<Snapshot>,
    max_memory: usize,
    current_memory: usize,
}

impl SnapshotHistory {
    pub fn new(max_memory: usize) -> Self {
        SnapshotHistory {
            snapshots: Vec::new(),
            max_memory,
            current_memory: 0,
        }
    }

    /// Add a snapshot to history
    pub fn push(&mut self, snapshot: Snapshot) -> Result<()> {
        let snapshot_size = snapshot.estimated_size();

        if self.current_memory + snapshot_size > self.max_memory {
            return Err(DebugError::SnapshotLimitExceeded {
                current: self.current_memory,
                incoming: snapshot_size,
                limit: self.max_memory,
            });
        }

        self.current_memory += snapshot_size;
        self.snapshots.push(snapshot);
        Ok(())
    }

    /// Get a snapshot by step index
    pub fn get(&self, index: usize) -> Option<&Snapshot> {
        self.snapshots.get(index)
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.snapshots.iter()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn memory_usage(&self) -> usize {
        self.current_memory
    }

    pub fn memory_limit(&self) -> usize {
        self.max_memory
    }
}

/// In-memory output sink that can be read back while a session writes to it
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    buffer: Rc<RefCell<Vec<u8>>>,
}

impl CapturedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.buffer.borrow()).into_owned()
    }

    /// Everything written so far, split into lines
    pub fn lines(&self) -> Vec<String> {
        self.text().lines().map(str::to_string).collect()
    }

    /// Decode every complete snapshot in the output, skipping other lines
    pub fn snapshots(&self) -> Result<Vec<Snapshot>> {
        let mut snapshots = Vec::new();
        let mut block = String::new();
        let mut in_block = false;

        for line in self.text().lines() {
            if line == VARS_START {
                block.clear();
                in_block = true;
            }
            if in_block {
                block.push_str(line);
                block.push('\n');
            }
            if line == STACK_END && in_block {
                snapshots.push(Snapshot::parse(&block)?);
                in_block = false;
            }
        }
        Ok(snapshots)
    }

    pub fn clear(&self) {
        self.buffer.borrow_mut().clear();
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
