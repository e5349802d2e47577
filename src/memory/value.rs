//! Value rendering
//!
//! Every observed value is turned into text by walking a fixed priority chain,
//! resolved per concrete type at compile time:
//!
//! 1. [`DebugRender`]: a structured, self-describing rendering used verbatim
//! 2. [`Textual`]: strings and characters, wrapped in double quotes
//! 3. [`Primitive`]: `true`/`false` for booleans, literal form for numbers
//! 4. [`std::fmt::Display`]: generic textual output, wrapped in double quotes
//! 5. anything else: the opaque placeholder `{...}`
//!
//! [`Render`] is the single entry point the rest of the crate calls. The std
//! scalars and containers implement it directly; collaborator types get it from
//! [`impl_render!`](crate::impl_render), which picks the highest applicable rule
//! through autoref method probing, so a type with both a structured rendering
//! and `Display` always renders structured.
//!
//! Containers render their elements by calling [`Render`] again, so the chain
//! applies recursively: `vec!["a", "b"]` renders as `["a", "b"]`.

use crate::constants::OPAQUE_VALUE;
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt::Display;
use std::hash::BuildHasher;
use std::rc::Rc;

/// Structured, self-describing rendering (JSON-like)
pub trait DebugRender {
    fn debug_render(&self) -> String;
}

/// Textual values: rendered between double quotes
pub trait Textual {
    fn text(&self) -> Cow<'_, str>;
}

/// Booleans and numbers: rendered in literal form
pub trait Primitive {
    fn literal(&self) -> String;
}

/// Text rendering of an observed value
pub trait Render {
    fn render(&self) -> String;
}

/// Wrap text in double quotes
pub fn quote(text: &str) -> String {
    format!("\"{}\"", text)
}

/// Strip module paths from a type name: `alloc::vec::Vec<i32>` → `Vec<i32>`
pub fn short_type_name(full: &str) -> String {
    let mut out = String::with_capacity(full.len());
    let mut ident = String::new();
    let mut chars = full.chars().peekable();

    while let Some(c) = chars.next() {
        if c == ':' && chars.peek() == Some(&':') {
            // Everything accumulated so far was a path segment
            chars.next();
            ident.clear();
        } else if c.is_alphanumeric() || c == '_' {
            ident.push(c);
        } else {
            out.push_str(&ident);
            ident.clear();
            out.push(c);
        }
    }
    out.push_str(&ident);
    out
}

/// Statically known type tag for `T`
pub fn type_tag<T: ?Sized>() -> String {
    short_type_name(std::any::type_name::<T>())
}

// === Scalars ===

impl Textual for str {
    fn text(&self) -> Cow<'_, str> {
        Cow::Borrowed(self)
    }
}

impl Textual for String {
    fn text(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.as_str())
    }
}

impl Textual for Cow<'_, str> {
    fn text(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.as_ref())
    }
}

impl Textual for char {
    fn text(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }
}

impl Primitive for bool {
    fn literal(&self) -> String {
        let word = if *self { "true" } else { "false" };
        word.to_string()
    }
}

macro_rules! integer_primitive {
    ($($ty:ty),+) => {$(
        impl Primitive for $ty {
            fn literal(&self) -> String {
                self.to_string()
            }
        }

        impl Render for $ty {
            fn render(&self) -> String {
                self.literal()
            }
        }
    )+};
}

integer_primitive!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

macro_rules! float_primitive {
    ($($ty:ty),+) => {$(
        impl Primitive for $ty {
            // Debug keeps the decimal point: 1.0 rather than 1
            fn literal(&self) -> String {
                format!("{:?}", self)
            }
        }

        impl Render for $ty {
            fn render(&self) -> String {
                self.literal()
            }
        }
    )+};
}

float_primitive!(f32, f64);

impl Render for bool {
    fn render(&self) -> String {
        self.literal()
    }
}

impl Render for str {
    fn render(&self) -> String {
        quote(&self.text())
    }
}

impl Render for String {
    fn render(&self) -> String {
        quote(&self.text())
    }
}

impl Render for Cow<'_, str> {
    fn render(&self) -> String {
        quote(&self.text())
    }
}

impl Render for char {
    fn render(&self) -> String {
        quote(&self.text())
    }
}

// === Indirection ===

impl<T: Render + ?Sized> Render for &T {
    fn render(&self) -> String {
        (**self).render()
    }
}

impl<T: Render + ?Sized> Render for Box<T> {
    fn render(&self) -> String {
        (**self).render()
    }
}

impl<T: Render + ?Sized> Render for Rc<T> {
    fn render(&self) -> String {
        (**self).render()
    }
}

impl<T: Render> Render for Option<T> {
    fn render(&self) -> String {
        match self {
            Some(value) => value.render(),
            None => "null".to_string(),
        }
    }
}

// === Containers ===

fn render_sequence<'a, T: Render + 'a>(items: impl IntoIterator<Item = &'a T>) -> String {
    let parts: Vec<String> = items.into_iter().map(Render::render).collect();
    format!("[{}]", parts.join(", "))
}

fn render_mapping<'a, K: Display + 'a, V: Render + 'a>(
    entries: impl IntoIterator<Item = (&'a K, &'a V)>,
) -> String {
    let parts: Vec<String> = entries
        .into_iter()
        .map(|(key, value)| format!("\"{}\": {}", key, value.render()))
        .collect();
    format!("{{{}}}", parts.join(", "))
}

impl<T: Render> DebugRender for [T] {
    fn debug_render(&self) -> String {
        render_sequence(self)
    }
}

impl<T: Render, const N: usize> DebugRender for [T; N] {
    fn debug_render(&self) -> String {
        render_sequence(self)
    }
}

impl<T: Render> DebugRender for Vec<T> {
    fn debug_render(&self) -> String {
        render_sequence(self)
    }
}

impl<T: Render> DebugRender for VecDeque<T> {
    fn debug_render(&self) -> String {
        render_sequence(self)
    }
}

impl<T: Render> DebugRender for BTreeSet<T> {
    fn debug_render(&self) -> String {
        render_sequence(self)
    }
}

impl<T: Render, S: BuildHasher> DebugRender for HashSet<T, S> {
    fn debug_render(&self) -> String {
        render_sequence(self)
    }
}

impl<K: Display, V: Render> DebugRender for BTreeMap<K, V> {
    fn debug_render(&self) -> String {
        render_mapping(self)
    }
}

impl<K: Display, V: Render, S: BuildHasher> DebugRender for HashMap<K, V, S> {
    fn debug_render(&self) -> String {
        render_mapping(self)
    }
}

macro_rules! render_structured {
    ($([$($generics:tt)*] $ty:ty),+ $(,)?) => {$(
        impl<$($generics)*> Render for $ty {
            fn render(&self) -> String {
                self.debug_render()
            }
        }
    )+};
}

render_structured!(
    [T: Render] [T],
    [T: Render, const N: usize] [T; N],
    [T: Render] Vec<T>,
    [T: Render] VecDeque<T>,
    [T: Render] BTreeSet<T>,
    [T: Render, S: BuildHasher] HashSet<T, S>,
    [K: Display, V: Render] BTreeMap<K, V>,
    [K: Display, V: Render, S: BuildHasher] HashMap<K, V, S>,
);

/// Compile-time resolution of the priority chain for a concrete type.
///
/// `(&&&&&Probe(value)).probe_render()` selects the impl with the most
/// references whose bound holds, which is the highest-priority capability.
#[doc(hidden)]
pub mod probe {
    use super::{quote, DebugRender, Primitive, Textual, OPAQUE_VALUE};
    use std::fmt::Display;

    pub struct Probe<'a, T: ?Sized>(pub &'a T);

    pub trait ViaStructured {
        fn probe_render(&self) -> String;
    }

    impl<T: DebugRender + ?Sized> ViaStructured for &&&&Probe<'_, T> {
        fn probe_render(&self) -> String {
            self.0.debug_render()
        }
    }

    pub trait ViaTextual {
        fn probe_render(&self) -> String;
    }

    impl<T: Textual + ?Sized> ViaTextual for &&&Probe<'_, T> {
        fn probe_render(&self) -> String {
            quote(&self.0.text())
        }
    }

    pub trait ViaPrimitive {
        fn probe_render(&self) -> String;
    }

    impl<T: Primitive + ?Sized> ViaPrimitive for &&Probe<'_, T> {
        fn probe_render(&self) -> String {
            self.0.literal()
        }
    }

    pub trait ViaDisplay {
        fn probe_render(&self) -> String;
    }

    impl<T: Display + ?Sized> ViaDisplay for &Probe<'_, T> {
        fn probe_render(&self) -> String {
            quote(&self.0.to_string())
        }
    }

    pub trait ViaOpaque {
        fn probe_render(&self) -> String;
    }

    impl<T: ?Sized> ViaOpaque for Probe<'_, T> {
        fn probe_render(&self) -> String {
            OPAQUE_VALUE.to_string()
        }
    }
}

/// Render an expression of concrete type through the priority chain
#[macro_export]
macro_rules! render {
    ($value:expr) => {{
        #[allow(unused_imports)]
        use $crate::memory::value::probe::{
            ViaDisplay as _, ViaOpaque as _, ViaPrimitive as _, ViaStructured as _,
            ViaTextual as _,
        };
        #[allow(clippy::needless_borrow)]
        let rendered = (&&&&&$crate::memory::value::probe::Probe(&$value)).probe_render();
        rendered
    }};
}

/// Implement [`Render`] for concrete types by resolving the priority chain
///
/// ```
/// use stepview::{impl_render, memory::value::{DebugRender, Render}};
///
/// struct Point { x: i32, y: i32 }
///
/// impl DebugRender for Point {
///     fn debug_render(&self) -> String {
///         format!("{{\"x\": {}, \"y\": {}}}", self.x, self.y)
///     }
/// }
///
/// impl_render!(Point);
/// assert_eq!(Point { x: 1, y: 2 }.render(), r#"{"x": 1, "y": 2}"#);
/// ```
#[macro_export]
macro_rules! impl_render {
    ($($ty:ty),+ $(,)?) => {$(
        impl $crate::memory::value::Render for $ty {
            fn render(&self) -> ::std::string::String {
                $crate::render!(*self)
            }
        }
    )+};
}
