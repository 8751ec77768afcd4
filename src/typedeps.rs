//! Type-dependency verification.
//!
//! Package-level declarations are flattened into dependency-first order via
//! a topological visit; a cycle that cannot be broken by a forward
//! declaration is a diagnostic: cycles involving owning types are
//! "ownership cycles", value cycles are "interdependent types". Reference
//! cycles (`type A { next &A }`) are legal and get a [`TopoItem::FwdDecl`]
//! entry so code generation can forward-declare the dependency.

use bit_vec::BitVec;
use crate::{Compiler, ErrorKind, Idx};
use crate::diag::DiagKind;
use crate::loc::{Loc, Origin};
use crate::pkg::Def;
use crate::symbol::Symbol;
use crate::types::{Ty, Type, TypeFlags};
use crate::types::ast::{NodeKind, Unit};

/// One entry of the dependency-ordered declaration list.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TopoItem {
  /// A type declaration, dependencies first.
  Type(Ty),
  /// A forward declaration inserted to break a (legal) cycle.
  FwdDecl(Ty),
  /// A function declaration; all types it mentions precede it.
  Fun(Def),
}

/// How we reached a type while checking, for help notes.
#[derive(Debug, Copy, Clone)]
enum Via {
  Decl,
  Field(Symbol),
  Alias(Symbol),
  Array,
}

struct DepCheck<'c> {
  comp: &'c Compiler,
  /// Declarations not yet fully checked; indexed by `Ty`.
  pending: BitVec,
  /// The DFS visit stack.
  vstk: Vec<Ty>,
}

/// Verify the type dependencies of all units and return the declarations
/// in topological (dependency-first) order.
pub fn check_typedeps(comp: &Compiler, units: &[Unit]) -> Result<Vec<TopoItem>, ErrorKind> {
  let items = toposort(comp, units);

  let mut cx = DepCheck {
    comp,
    pending: BitVec::from_elem(comp.types.len(), false),
    vstk: Vec::new(),
  };
  for item in &items {
    if let TopoItem::Type(t) = item {
      cx.pending.set(t.into_usize(), true);
    }
  }

  let mut ok = true;
  for item in &items {
    let TopoItem::Type(t) = *item else { continue };
    if !cx.pending[t.into_usize()] {
      continue;
    }
    ok = cx.check_type(0, t, Via::Decl, comp.types.loc(t));
    if !ok {
      break;
    }
  }

  if ok && comp.ok() { Ok(items) } else { Err(ErrorKind::Invalid) }
}

/// Flatten all package-level declarations into dependency-first order.
/// When a dependency cycle is found, the cyclic type is flagged `CYCLIC`
/// and a `FwdDecl` is inserted before the first dependant.
#[must_use] pub fn toposort(comp: &Compiler, units: &[Unit]) -> Vec<TopoItem> {
  #[derive(Copy, Clone, PartialEq)]
  enum Mark { White, Grey, Black }

  struct Sorter<'c> {
    comp: &'c Compiler,
    marks: Vec<Mark>,
    out: Vec<TopoItem>,
  }

  impl Sorter<'_> {
    fn mark(&mut self, t: Ty) -> Mark {
      if self.marks.len() <= t.into_usize() {
        self.marks.resize(t.into_usize() + 1, Mark::White);
      }
      self.marks[t.into_usize()]
    }

    fn visit(&mut self, t: Ty) {
      match self.mark(t) {
        Mark::Black => return,
        Mark::Grey => {
          // cycle: emit a forward declaration before the dependant
          self.comp.types.add_flags(t, TypeFlags::CYCLIC);
          if !self.out.contains(&TopoItem::FwdDecl(t)) {
            self.out.push(TopoItem::FwdDecl(t));
          }
          return;
        }
        Mark::White => {}
      }
      self.marks[t.into_usize()] = Mark::Grey;

      let data = self.comp.types.data(t);
      match &data {
        Type::Ptr(e) | Type::Ref(e) | Type::MutRef(e) | Type::Slice(e) |
        Type::MutSlice(e) | Type::Optional(e) | Type::Array(e, _) => self.visit(*e),
        Type::Struct { fields, .. } => {
          for f in fields {
            self.visit(f.ty);
          }
        }
        Type::Alias { elem, .. } => self.visit(*elem),
        Type::Fun { params, result } => {
          for p in params {
            self.visit(p.ty);
          }
          self.visit(*result);
        }
        Type::Template { body, .. } => self.visit(*body),
        Type::Instance { recv, args } => {
          self.visit(*recv);
          for &a in args {
            self.visit(a);
          }
        }
        _ => {}
      }

      self.marks[t.into_usize()] = Mark::Black;
      // only named declarations appear in the output
      if matches!(data,
        Type::Struct { name: Some(_), .. } | Type::Alias { .. } |
        Type::Template { .. } | Type::Named { .. })
      {
        self.out.push(TopoItem::Type(t));
      }
    }
  }

  let mut s = Sorter { comp, marks: Vec::new(), out: Vec::new() };
  for unit in units {
    for &child in &unit.children {
      if let NodeKind::Typedef { .. } = unit.ast[child].kind {
        s.visit(unit.ast[child].ty);
      }
    }
  }
  for (ui, unit) in units.iter().enumerate() {
    for &child in &unit.children {
      if let NodeKind::Fun { .. } = unit.ast[child].kind {
        s.visit(unit.ast[child].ty);
        s.out.push(TopoItem::Fun(Def { unit: ui as u32, node: child }));
      }
    }
  }
  s.out
}

impl DepCheck<'_> {
  fn fmt_ty(&self, t: Ty) -> String {
    self.comp.types.fmt(&self.comp.syms, t)
  }

  fn report(&self, loc: Loc, kind: DiagKind, msg: String) {
    let origin = Origin::of_loc(&self.comp.locmap, loc);
    self.comp.diag.report(origin, kind, msg);
  }

  /// The "(A -> B -> A)" cycle path starting at the previous occurrence of
  /// `bt` on the visit stack.
  fn cycle_path(&self, bt: Ty) -> String {
    let start = self.vstk.iter().position(|&t| t == bt).unwrap_or(0);
    let mut path = String::from(" (");
    for &t in &self.vstk[start..] {
      path.push_str(&self.fmt_ty(t));
      path.push_str(" -> ");
    }
    path.push_str(&self.fmt_ty(bt));
    path.push(')');
    path
  }

  fn error_cycle(&self, bt: Ty, via: Via, loc: Loc) -> bool {
    let path = self.cycle_path(bt);
    if self.comp.types.is_owner(bt) {
      self.report(loc, DiagKind::Error, format!(
        "ownership cycle: {} manages its own lifetime{}", self.fmt_ty(bt), path));
    } else {
      self.report(loc, DiagKind::Error, format!(
        "interdependent type {}{}", self.fmt_ty(bt), path));
    }
    self.help_cycle(bt, via, loc);
    false
  }

  fn help_cycle(&self, bt: Ty, via: Via, loc: Loc) {
    let kind_prefix = if self.comp.types.is_owner(bt) { "managed-lifetime " } else { "" };
    let msg = match via {
      Via::Field(name) => format!(
        "field \"{}\" of {kind_prefix}{}",
        self.comp.syms.name(name), self.fmt_ty(bt)),
      Via::Alias(name) => format!(
        "type alias \"{}\" of {kind_prefix}{}",
        self.comp.syms.name(name), self.fmt_ty(bt)),
      Via::Array => format!("array of {kind_prefix}{}", self.fmt_ty(bt)),
      Via::Decl => format!("type {} defined here", self.fmt_ty(bt)),
    };
    let helploc = if self.comp.types.loc(bt).is_known() {
      self.comp.types.loc(bt)
    } else {
      loc
    };
    self.report(helploc, DiagKind::Help, msg);
  }

  fn check_type(&mut self, aliasnest: u32, t: Ty, via: Via, loc: Loc) -> bool {
    let ts = &self.comp.types;

    // bt becomes the "bottom type" of t, e.g. ?*T => T
    let mut bt = t;
    loop {
      match ts.data(bt) {
        Type::Optional(e) | Type::Ptr(e) => bt = e,

        // inspected closer below: may contain subtypes
        Type::Array(..) | Type::Struct { .. } | Type::Alias { .. } |
        Type::Instance { .. } => break,

        // reference types only matter inside an alias
        Type::Ref(_) | Type::MutRef(_) | Type::Slice(_) | Type::MutSlice(_) => {
          if aliasnest > 0 {
            break;
          }
          return true;
        }

        // other types cannot cause cycles
        _ => return true,
      }
    }

    // previously seen on the visit stack: a cycle
    if self.vstk.contains(&bt) {
      return self.error_cycle(bt, via, loc);
    }

    // already fully checked?
    if bt.into_usize() < self.pending.len() && !self.pending[bt.into_usize()] {
      return true;
    }
    if bt.into_usize() < self.pending.len() {
      self.pending.set(bt.into_usize(), false);
    }

    self.vstk.push(bt);
    let defloc = if ts.loc(bt).is_known() { ts.loc(bt) } else { loc };

    let ok = match ts.data(bt) {
      Type::Array(e, _) =>
        self.check_type(aliasnest, e, Via::Array, defloc),
      Type::Ref(e) | Type::MutRef(e) | Type::Slice(e) | Type::MutSlice(e) =>
        self.check_type(aliasnest, e, via, defloc),

      Type::Alias { name, elem } => {
        // special case: alias of array of same alias, e.g. "type A [&A]"
        let is_self_array = matches!(ts.data(elem), Type::Array(ae, _)
          if ts.unwrap_ptr(ae) == bt);
        if is_self_array {
          self.vstk.push(elem);
          let r = self.error_cycle(elem, Via::Alias(name), defloc);
          self.help_cycle(bt, via, defloc);
          self.vstk.pop();
          r
        } else {
          self.check_type(aliasnest + 1, elem, Via::Alias(name), defloc)
        }
      }

      Type::Struct { fields, .. } => {
        let mut ok = true;
        for f in &fields {
          // Optional owning pointers could be allowed here, but dropping a
          // long cycle like A -> B -> C -> A requires generated code we do
          // not emit; reject like any other ownership cycle.
          if !self.check_type(aliasnest, f.ty, Via::Field(f.name), defloc) {
            ok = false;
            break;
          }
        }
        ok
      }

      Type::Instance { recv, args } => {
        let mut ok = self.check_type(aliasnest, recv, via, defloc);
        for &a in &args {
          if !ok {
            break;
          }
          ok = self.check_type(aliasnest, a, via, defloc);
        }
        ok
      }

      // a declared-but-undefined named type has no dependencies
      Type::Named { .. } => true,

      _ => true,
    };

    self.vstk.pop();

    if !ok && matches!(via, Via::Field(_) | Via::Alias(_) | Via::Array) {
      self.help_cycle(bt, via, loc);
    }
    ok
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use crate::Compiler;
  use crate::infer::typecheck_pkg;
  use crate::loc::SrcFile;
  use crate::pkg::Pkg;

  fn run(src: &str) -> (Compiler, Vec<String>, Result<Vec<TopoItem>, ErrorKind>) {
    let comp = Compiler::new_for_tests();
    let msgs: Arc<std::sync::Mutex<Vec<String>>> = Arc::default();
    let m2 = msgs.clone();
    comp.diag.set_handler(Box::new(move |d| m2.lock().unwrap().push(d.msg_short.clone())));
    let pkg = Arc::new(Pkg::new("/t/p".into(), "p".into(), "/t".into()));
    let file = SrcFile::new("t.co", src.as_bytes().to_vec());
    let mut units = vec![comp.parse_unit(file)];
    let _ = typecheck_pkg(&comp, &pkg, &mut units);
    let r = check_typedeps(&comp, &units);
    let msgs = msgs.lock().unwrap().clone();
    (comp, msgs, r)
  }

  #[test]
  fn topo_orders_dependencies_first() {
    let (comp, _msgs, r) = run(
      "type B { x X }\ntype X { v int }\ntype A { b B }\n");
    assert_eq!(comp.errcount(), 0);
    let items = r.unwrap();
    let types: Vec<String> = items.iter().filter_map(|i| match i {
      TopoItem::Type(t) => Some(comp.types.fmt(&comp.syms, *t)),
      _ => None,
    }).collect();
    let pos = |n: &str| types.iter().position(|t| t == n).unwrap();
    assert!(pos("X") < pos("B"));
    assert!(pos("B") < pos("A"));
  }

  #[test]
  fn value_cycle_is_interdependent() {
    let (comp, msgs, r) = run("type A { x B }\ntype B { x A }\n");
    assert!(comp.errcount() >= 1);
    assert!(r.is_err());
    let all = msgs.join("\n");
    assert!(all.contains("interdependent type"), "{all}");
    assert!(all.contains("A -> B -> A") || all.contains("B -> A -> B"), "{all}");
  }

  #[test]
  fn owning_pointer_cycle_is_ownership_cycle() {
    let (comp, msgs, _r) = run("type A { next *A }\n");
    assert!(comp.errcount() >= 1);
    let all = msgs.join("\n");
    assert!(all.contains("ownership cycle"), "{all}");
    assert!(all.contains("manages its own lifetime"), "{all}");
  }

  #[test]
  fn reference_cycle_gets_fwddecl() {
    let (comp, _msgs, r) = run("type A { next &A }\n");
    assert_eq!(comp.errcount(), 0);
    let items = r.unwrap();
    assert!(items.iter().any(|i| matches!(i, TopoItem::FwdDecl(_))),
      "expected a forward declaration: {items:?}");
  }

  #[test]
  fn alias_of_array_of_self_rejected() {
    let (comp, msgs, r) = run("type A [&A]\n");
    assert!(comp.errcount() >= 1, "msgs: {}", msgs.join("\n"));
    assert!(r.is_err());
    let all = msgs.join("\n");
    assert!(all.contains("type alias \"A\""), "{all}");
  }

  #[test]
  fn funs_follow_their_types() {
    let (comp, _msgs, r) = run("type T { v int }\nfun f(x T) {\n}\n");
    assert_eq!(comp.errcount(), 0);
    let items = r.unwrap();
    let tpos = items.iter().position(|i| matches!(i, TopoItem::Type(_))).unwrap();
    let fpos = items.iter().position(|i| matches!(i, TopoItem::Fun(_))).unwrap();
    assert!(tpos < fpos);
  }
}
