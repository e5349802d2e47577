// Constants for the snapshot wire protocol

/// Opens the variables section (stack variables followed by heap records)
pub const VARS_START: &str = "[DEBUG:VARS:START]";

/// Closes the variables section
pub const VARS_END: &str = "[DEBUG:VARS:END]";

/// Opens the call stack section
pub const STACK_START: &str = "[DEBUG:STACK:START]";

/// Closes the call stack section
pub const STACK_END: &str = "[DEBUG:STACK:END]";

/// Separator between the seven fields of a variable or heap line
pub const FIELD_SEPARATOR: char = '|';

/// Number of fields in every variable or heap line
pub const FIELD_COUNT: usize = 7;

/// Heap records are named `*<address>` so they never collide with variable names
pub const HEAP_NAME_PREFIX: char = '*';

/// Target address written for anything that is not a non-null pointer
pub const NO_TARGET: &str = "0";

/// Type tag carried by every pointer observer
pub const POINTER_TYPE_TAG: &str = "ptr";

/// Type tag of a heap record that has not been enriched yet
pub const RAW_TYPE_TAG: &str = "raw";

/// Rendered value of a null pointer observer
pub const NULL_POINTER_VALUE: &str = "nullptr";

/// Dereferenced value of a null pointer observer
pub const NULL_DEREF_VALUE: &str = "null";

/// Placeholder for values with no textual rendering
pub const OPAQUE_VALUE: &str = "{...}";

/// Prefix of the diagnostic printed before a fail-fast abort
pub const ERROR_PREFIX: &str = "[!ERROR]";

/// Prefixes of the `expect_equal!` report lines
pub const TEST_PASS_PREFIX: &str = "[TEST:PASS]";
pub const TEST_FAIL_PREFIX: &str = "[TEST:FAIL]";

/// Default cap on nested heap enrichment
pub const DEFAULT_ENRICH_DEPTH_LIMIT: usize = 50;

/// Default byte budget for recorded snapshot history (64 MB)
pub const DEFAULT_HISTORY_LIMIT: usize = 64 * 1024 * 1024;
