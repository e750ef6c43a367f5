//! The name service.
//!
//! Issues unique temporary names (`<func>.tmp.<n>`) and unique labels
//! (`<func>.<tag>.<n>`) from two monotonic counters.  The counters are
//! scoped per compilation, not per process, so separate compilations are
//! self-contained.  Every temporary is also registered in the symbol table
//! as a local, so later stages can look up its type.

use crate::common::*;
use crate::front::sym::SymbolTable;
use crate::front::types::Type;
use crate::middle::tac::Value;

#[derive(Default)]
pub struct NameGen {
    temps: u64,
    labels: u64,
}

impl NameGen {
    pub fn new() -> Self {
        NameGen::default()
    }

    /// A fresh temporary of the given (non-void) type, registered as a
    /// local.
    pub fn fresh_temp(&mut self, func: Id, ty: &Type, symbols: &mut SymbolTable) -> Value {
        let n = self.temps;
        self.temps += 1;
        let name = id(&format!("{func}.tmp.{n}"));
        symbols.add_local(name, ty.clone(), None);
        Value::Var(name, ty.clone())
    }

    /// A fresh destination for a value of the given type.  Void-typed
    /// results have no destination; callers must not read them.
    pub fn fresh_dst(
        &mut self,
        func: Id,
        ty: &Type,
        symbols: &mut SymbolTable,
    ) -> Option<Value> {
        if ty.is_void() {
            None
        } else {
            Some(self.fresh_temp(func, ty, symbols))
        }
    }

    /// A fresh label `<func>.<tag>.<n>`.
    pub fn fresh_label(&mut self, func: Id, tag: &str) -> Id {
        let n = self.labels;
        self.labels += 1;
        id(&format!("{func}.{tag}.{n}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique_and_registered() {
        let mut names = NameGen::new();
        let mut symbols = SymbolTable::new();
        let f = id("main");
        let a = names.fresh_temp(f, &Type::Int, &mut symbols);
        let b = names.fresh_temp(f, &Type::Int, &mut symbols);
        assert_ne!(a, b);
        let Value::Var(name, _) = a else { panic!() };
        assert!(symbols.get(name).is_some());
        assert_eq!(name.as_str(), "main.tmp.0");

        let l0 = names.fresh_label(f, "loop");
        let l1 = names.fresh_label(f, "loop");
        assert_ne!(l0, l1);
        assert_eq!(l0.as_str(), "main.loop.0");
    }

    #[test]
    fn void_destinations_are_absent() {
        let mut names = NameGen::new();
        let mut symbols = SymbolTable::new();
        assert!(names
            .fresh_dst(id("f"), &Type::Void, &mut symbols)
            .is_none());
    }
}
