//! The symbol interner, which maps byte strings to unique [`Symbol`] values.
//!
//! Two equal strings interned at any time yield the same `Symbol`, so symbol
//! comparison is a cheap integer compare. The interner is a read-mostly
//! service: lookups take a shared lock, first-time interning takes the
//! exclusive lock.

use std::fmt;
use std::sync::{Arc, RwLock};
use hashbrown::HashMap;
use crate::Idx;

/// An interned string.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl Idx for Symbol {
  fn into_usize(self) -> usize { self.0 as usize }
  fn from_usize(n: usize) -> Self { Symbol(n as u32) }
}

impl fmt::Debug for Symbol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "s{}", self.0) }
}

macro_rules! predefined {
  ($($name:ident: $e:expr,)*) => {
    impl Symbol {
      predefined! { @consts 0; $($name: $e,)* }
    }
    const PREDEFINED: &[&str] = &[$($e),*];
  };
  (@consts $n:expr;) => {};
  (@consts $n:expr; $name:ident: $e:expr, $($rest:ident: $e2:expr,)*) => {
    #[doc = concat!("The symbol `", $e, "`.")]
    pub const $name: Symbol = Symbol($n);
    predefined! { @consts $n + 1; $($rest: $e2,)* }
  };
}

predefined! {
  UNDER: "_",
  THIS: "this",
  DROP: "drop",
  MAIN: "main",
  STR: "str",
  AS: "as",
  FROM: "from",
  LEN: "len",
  CAP: "cap",
}

struct Inner {
  names: HashMap<Arc<str>, Symbol>,
  strings: Vec<Arc<str>>,
}

/// The symbol intern table. See the module documentation.
pub struct Interner(RwLock<Inner>);

impl Default for Interner {
  fn default() -> Self { Self::new() }
}

impl Interner {
  /// Create an interner with the predefined symbols already present.
  #[must_use] pub fn new() -> Self {
    let it = Interner(RwLock::new(Inner {
      names: HashMap::with_capacity(512),
      strings: Vec::with_capacity(512),
    }));
    for (i, s) in PREDEFINED.iter().enumerate() {
      assert_eq!(it.intern(s), Symbol(i as u32));
    }
    it
  }

  /// Intern a string, returning its unique symbol.
  ///
  /// Interned contents must not contain NUL or LF; the AST encoder cannot
  /// represent symbols containing those bytes.
  pub fn intern(&self, s: &str) -> Symbol {
    debug_assert!(
      !s.bytes().any(|b| b == 0 || b == b'\n'),
      "symbol {s:?} contains a prohibited byte");
    if let Some(&sym) = self.0.read().unwrap().names.get(s) {
      return sym;
    }
    let mut inner = self.0.write().unwrap();
    // racing interner may have won while we upgraded the lock
    if let Some(&sym) = inner.names.get(s) {
      return sym;
    }
    let sym = Symbol(inner.strings.len() as u32);
    let name: Arc<str> = s.into();
    inner.strings.push(name.clone());
    inner.names.insert(name, sym);
    sym
  }

  /// Get the string contents of a symbol.
  #[must_use] pub fn name(&self, s: Symbol) -> Arc<str> {
    self.0.read().unwrap().strings[s.into_usize()].clone()
  }

  /// Number of symbols interned so far.
  #[must_use] pub fn len(&self) -> usize { self.0.read().unwrap().strings.len() }
  #[must_use] pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn intern_uniqueness() {
    let it = Interner::new();
    let a = it.intern("hello");
    let b = it.intern("hello");
    let c = it.intern("hell");
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(&*it.name(a), "hello");
    assert_eq!(&*it.name(c), "hell");
  }

  #[test]
  fn predefined_symbols() {
    let it = Interner::new();
    assert_eq!(it.intern("_"), Symbol::UNDER);
    assert_eq!(it.intern("this"), Symbol::THIS);
    assert_eq!(it.intern("drop"), Symbol::DROP);
    assert_eq!(it.intern("main"), Symbol::MAIN);
  }

  #[test]
  fn intern_across_threads() {
    let it = std::sync::Arc::new(Interner::new());
    let mut handles = vec![];
    for _ in 0..4 {
      let it = it.clone();
      handles.push(std::thread::spawn(move || {
        (0..100).map(|i| it.intern(&format!("sym{i}"))).collect::<Vec<_>>()
      }));
    }
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for w in results.windows(2) {
      assert_eq!(w[0], w[1]);
    }
  }
}
