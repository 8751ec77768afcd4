//! Lexical scope tracking for the parser and type checker.
//!
//! A simple stack we search linearly on lookup. This beats chained hash maps
//! in practice because of cache locality and because most bindings are
//! short-lived: unwinding a scope is a single index rewind.

use crate::symbol::Symbol;
use crate::types::ast::NodeId;

#[derive(Debug, Copy, Clone)]
enum Entry {
  /// Saved base index of the enclosing scope.
  Frame(u32),
  Binding(Symbol, NodeId),
}

/// A stack of `(Symbol, NodeId)` bindings with base-index frames.
#[derive(Debug, Default)]
pub struct Scope {
  entries: Vec<Entry>,
  base: u32,
  stashed: Vec<(Vec<Entry>, u32)>,
}

impl Scope {
  #[must_use] pub fn new() -> Scope { Scope::default() }

  pub fn clear(&mut self) {
    self.entries.clear();
    self.base = 0;
    self.stashed.clear();
  }

  /// Open a new scope, saving the current base.
  pub fn push(&mut self) {
    self.entries.push(Entry::Frame(self.base));
    self.base = self.entries.len() as u32;
  }

  /// Close the current scope, rewinding to the saved base.
  pub fn pop(&mut self) {
    assert!(self.base > 0, "unbalanced scope pop");
    let Entry::Frame(parent_base) = self.entries[self.base as usize - 1] else {
      unreachable!("corrupt scope stack");
    };
    self.entries.truncate(self.base as usize - 1);
    self.base = parent_base;
  }

  /// Bind `name` in the current scope. Shadowing is permitted; lookup finds
  /// the most recent binding.
  pub fn define(&mut self, name: Symbol, n: NodeId) {
    self.entries.push(Entry::Binding(name, n));
  }

  /// Look up `name`, scanning from the innermost scope outward.
  #[must_use] pub fn lookup(&self, name: Symbol) -> Option<NodeId> {
    for e in self.entries.iter().rev() {
      if let Entry::Binding(k, v) = *e {
        if k == name {
          return Some(v);
        }
      }
    }
    None
  }

  /// Look up `name` in the current (innermost) scope only.
  #[must_use] pub fn lookup_local(&self, name: Symbol) -> Option<NodeId> {
    for e in self.entries[self.base as usize..].iter().rev() {
      if let Entry::Binding(k, v) = *e {
        if k == name {
          return Some(v);
        }
      }
    }
    None
  }

  /// Temporarily hide all bindings of the current scope. Used to isolate an
  /// `if` expression's "then" bindings from its "else" branch.
  pub fn stash(&mut self) {
    let hidden = self.entries.split_off(self.base as usize);
    self.stashed.push((hidden, self.base));
  }

  /// Restore the most recently stashed bindings.
  pub fn unstash(&mut self) {
    let (hidden, base) = self.stashed.pop().expect("unstash without stash");
    assert_eq!(base, self.base, "unstash in a different scope");
    self.entries.truncate(self.base as usize);
    self.entries.extend(hidden);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::Idx;

  fn sym(n: usize) -> Symbol { Symbol::from_usize(n) }
  fn node(n: usize) -> NodeId { NodeId::from_usize(n) }

  #[test]
  fn define_lookup_shadow() {
    let mut s = Scope::new();
    s.push();
    s.define(sym(1), node(10));
    assert_eq!(s.lookup(sym(1)), Some(node(10)));
    s.push();
    s.define(sym(1), node(20));
    assert_eq!(s.lookup(sym(1)), Some(node(20)));
    assert_eq!(s.lookup_local(sym(1)), Some(node(20)));
    s.pop();
    assert_eq!(s.lookup(sym(1)), Some(node(10)));
    s.pop();
    assert_eq!(s.lookup(sym(1)), None);
  }

  #[test]
  fn stash_hides_bindings() {
    let mut s = Scope::new();
    s.push();
    s.define(sym(1), node(1));
    s.push();
    s.define(sym(2), node(2));
    s.stash();
    assert_eq!(s.lookup(sym(2)), None);
    assert_eq!(s.lookup(sym(1)), Some(node(1)));
    s.define(sym(3), node(3));
    s.unstash();
    assert_eq!(s.lookup(sym(2)), Some(node(2)));
    assert_eq!(s.lookup(sym(3)), None);
    s.pop();
    s.pop();
  }
}
