//! The global symbol table.
//!
//! One flat table for the whole compilation: the checker renames locals so
//! that every name is unique, and TAC lowering inserts its synthesized
//! temporaries and string constants here so the back end can look up their
//! types.

use crate::common::*;
use crate::front::types::{Type, TypeTable};

/// Storage class of a file-scope or `static` variable.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Storage {
    Static,
    Extern,
}

/// One cell of a fully lowered static initializer.
///
/// The cells of an initializer list are byte-accurate: their sizes sum to
/// the size of the initialized object.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum InitCell {
    Char(i8),
    UChar(u8),
    Short(i16),
    UShort(u16),
    Int(i32),
    UInt(u32),
    Long(i32),
    ULong(u32),
    /// A run of zero bytes.
    Zero(u32),
    /// Raw string bytes, without terminator.
    String(Vec<u8>),
    /// A word-sized slot holding the address of another symbol.
    Pointer(Id),
}

impl InitCell {
    pub fn size(&self) -> u32 {
        use InitCell::*;
        match self {
            Char(_) | UChar(_) => 1,
            Short(_) | UShort(_) => 2,
            Int(_) | UInt(_) | Long(_) | ULong(_) | Pointer(_) => 4,
            Zero(n) => *n,
            String(bytes) => bytes.len() as u32,
        }
    }
}

/// Initializer state of a static variable.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum StaticInit {
    None,
    Tentative,
    Initial(Vec<InitCell>),
}

/// What kind of entity a symbol is.
#[derive(Clone, Debug)]
pub enum Attr {
    /// A stack-allocated local or compiler temporary.  The cleanup handler,
    /// if any, is called with the local's address on scope exit.
    Local { cleanup: Option<Id> },
    /// A variable with static storage duration.  `global` means the symbol
    /// is visible to the linker.
    Static {
        global: bool,
        storage: Storage,
        init: StaticInit,
    },
    /// A function.
    Fun { defined: bool, global: bool },
    /// Read-only data, e.g. a string literal.
    Const { init: Vec<InitCell> },
}

#[derive(Clone, Debug)]
pub struct Symbol {
    pub ty: Type,
    pub attr: Attr,
}

impl Symbol {
    pub fn is_static_storage(&self) -> bool {
        matches!(self.attr, Attr::Static { .. } | Attr::Const { .. })
    }
}

/// The flat, global symbol table.
#[derive(Default, Debug)]
pub struct SymbolTable {
    entries: Map<Id, Symbol>,
    strings: u32,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    pub fn insert(&mut self, name: Id, sym: Symbol) {
        self.entries.insert(name, sym);
    }

    pub fn add_local(&mut self, name: Id, ty: Type, cleanup: Option<Id>) {
        self.insert(
            name,
            Symbol {
                ty,
                attr: Attr::Local { cleanup },
            },
        );
    }

    pub fn add_const(&mut self, name: Id, ty: Type, init: Vec<InitCell>) {
        self.insert(name, Symbol { ty, attr: Attr::Const { init } });
    }

    /// Register an anonymous string constant (terminator included) and
    /// return its synthesized name.
    pub fn add_string(&mut self, bytes: &[u8]) -> Id {
        let name = loop {
            let candidate = crate::common::id(&format!("str.{}", self.strings));
            self.strings += 1;
            if self.get(candidate).is_none() {
                break candidate;
            }
        };
        let ty = Type::Char.array_of(bytes.len() as u32 + 1);
        let mut init = vec![InitCell::String(bytes.to_vec()), InitCell::Zero(1)];
        if bytes.is_empty() {
            init.remove(0);
        }
        self.add_const(name, ty, init);
        name
    }

    pub fn get(&self, name: Id) -> Option<&Symbol> {
        self.entries.get(&name)
    }

    pub fn expect(&self, name: Id) -> Result<&Symbol, Error> {
        self.get(name)
            .ok_or_else(|| Error::new("symbol lookup", format!("no symbol table entry for '{name}'")))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Id, &Symbol)> {
        self.entries.iter()
    }
}

/// The shared read-only tables the middle and back ends consult.
#[derive(Default, Debug)]
pub struct Tables {
    pub symbols: SymbolTable,
    pub types: TypeTable,
}
