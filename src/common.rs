//! Common definitions that are shared between different parts of the compiler.

// Use sorted sets and maps for consistent output
pub use std::collections::{BTreeMap as Map, BTreeSet as Set};

/// Identifiers.
///
/// Interned strings are `Copy` and live for the whole compilation, so every
/// IR can hold names and labels by value.
pub type Id = internment::Intern<String>;

/// Intern a string slice as an [Id].
pub fn id(s: &str) -> Id {
    Id::from_ref(s)
}

/// A position in the source text.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, derive_more::Display)]
#[display("{file}:{line}:{col}")]
pub struct Loc {
    pub file: Id,
    pub line: u32,
    pub col: u32,
}

impl Loc {
    pub fn new(file: Id, line: u32, col: u32) -> Self {
        Loc { file, line, col }
    }
}

/// A fatal compilation error from the middle or back end.
///
/// The front end is expected to reject all bad programs, so anything the
/// later stages report is an internal invariant violation or an unsupported
/// construct.  The error carries the operation that failed, the enclosing
/// function if there is one, and the closest known source position.
pub struct Error {
    pub op: &'static str,
    pub func: Option<Id>,
    pub loc: Option<Loc>,
    pub msg: String,
}

impl Error {
    pub fn new(op: &'static str, msg: impl Into<String>) -> Self {
        Error {
            op,
            func: None,
            loc: None,
            msg: msg.into(),
        }
    }

    pub fn in_func(mut self, func: Id) -> Self {
        self.func = Some(func);
        self
    }

    pub fn at(mut self, loc: Loc) -> Self {
        self.loc = Some(loc);
        self
    }

    pub fn from_front(err: crate::front::FrontError) -> Self {
        Error::new("front", err.to_string())
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "error [{}]", self.op)?;
        if let Some(func) = &self.func {
            write!(f, " in function '{func}'")?;
        }
        if let Some(loc) = &self.loc {
            write!(f, " at {loc}")?;
        }
        write!(f, ": {}", self.msg)
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}
