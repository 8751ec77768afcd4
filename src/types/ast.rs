//! The AST node model.
//!
//! All node kinds live in a single enum with a shared header (kind, flags,
//! location, type, use count). Nodes are allocated from a per-unit index
//! arena and reference each other by [`NodeId`]; they are never freed
//! individually.

use std::sync::Arc;
use bitflags::bitflags;
use crate::Idx;
use crate::loc::{Loc, SrcFile};
use crate::pkg::Pkg;
use crate::symbol::Symbol;
use crate::types::{Op, Ty};

/// Index of a node in its unit's arena.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl Idx for NodeId {
  fn into_usize(self) -> usize { self.0 as usize }
  fn from_usize(n: usize) -> Self { NodeId(n as u32) }
}

impl std::fmt::Debug for NodeId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "n{}", self.0)
  }
}

bitflags! {
  /// AST node flags. The low two bits encode visibility.
  #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
  pub struct NodeFlags: u16 {
    const VIS_PKG     = 1 << 0; // visible within same package
    const VIS_PUB     = 1 << 1; // visible to other packages
    const CHECKED     = 1 << 2; // typecheck'ed (or doesn't need it)
    const RVALUE      = 1 << 3; // expression is used as an rvalue
    const NARROWED    = 1 << 4; // type-narrowed from optional
    const UNKNOWN     = 1 << 5; // has or contains unresolved identifier
    const NAMEDPARAMS = 1 << 6; // function has named parameters
    const DROP        = 1 << 7; // type has drop() function
    const SUBOWNERS   = 1 << 8; // type has owning elements
    const EXIT        = 1 << 9; // [block] exits ("return" or "break")
    const CONST       = 1 << 9; // [anything but block] is a constant
    const PKGNS       = 1 << 10; // [namespace] is a package API
    const TEMPLATE    = 1 << 11; // templatized
    const TEMPLATEI   = 1 << 12; // instance of template
    const CYCLIC      = 1 << 13; // [usertype] references itself
    const MARK1       = 1 << 14; // general-use marker
    const MARK2       = 1 << 15; // general-use marker
  }
}

/// Flags that transfer from children to parents when a child is attached.
pub const NODEFLAGS_BUBBLE: NodeFlags = NodeFlags::UNKNOWN;

const VIS_MASK: NodeFlags = NodeFlags::VIS_PKG.union(NodeFlags::VIS_PUB);

/// Symbolic visibility level, ordered unit < pkg < pub.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Vis { Unit, Pkg, Pub }

impl NodeFlags {
  #[must_use] pub fn vis(self) -> Vis {
    if self.contains(NodeFlags::VIS_PUB) { Vis::Pub }
    else if self.contains(NodeFlags::VIS_PKG) { Vis::Pkg }
    else { Vis::Unit }
  }

  pub fn set_vis(&mut self, vis: Vis) {
    *self &= !VIS_MASK;
    match vis {
      Vis::Unit => {}
      Vis::Pkg => *self |= NodeFlags::VIS_PKG,
      Vis::Pub => *self |= NodeFlags::VIS_PUB,
    }
  }

  /// Raise visibility to at least `minvis`.
  pub fn upgrade_vis(&mut self, minvis: Vis) {
    if self.vis() < minvis {
      self.set_vis(minvis);
    }
  }
}

/// Which kind of local binding a `Local` node is.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LocalKind { Field, Param, Var, Let }

/// One identifier in an import member list, e.g. `y as x` in
/// `import y as x from "p"`.
#[derive(Debug, Clone)]
pub struct ImportSel {
  pub name: Symbol,                // local name (x in "y as x")
  pub origname: Option<Symbol>,    // y in "y as x"
  pub loc: Loc,
  pub orignameloc: Loc,
}

/// A pending drop recorded into a block by the IR builder, consumed by
/// code generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropEntry {
  pub name: Symbol,
  pub ty: Ty,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
  /// Invalid node; product of a parse error.
  Bad,
  Comment { text: Box<str> },

  // statements
  Import {
    path: Box<str>,
    pathloc: Loc,
    name: Symbol,                 // local package identifier (UNDER if none)
    nameloc: Loc,
    ids: Vec<ImportSel>,          // imported identifiers, empty = whole-pkg
    pkg: Option<Arc<Pkg>>,        // resolved by import_pkgs
    next_import: Option<NodeId>,  // intrusive list, head in Unit
  },
  Typedef {
    name: Symbol,
    nameloc: Loc,
    texpr: NodeId,
    /// Template parameter names, e.g. `T` in `type Box<T> { v T }`.
    tplparams: Vec<Symbol>,
  },

  // expressions
  Fun {
    name: Option<Symbol>,
    nameloc: Loc,
    params: Vec<NodeId>,          // Local/Param nodes
    result: Option<NodeId>,       // type expression; None = void
    body: Option<NodeId>,         // Block; None = prototype
    recvt: Ty,                    // receiver type for type functions, or Ty::UNKNOWN
    paramsloc: Loc,
    paramsendloc: Loc,
    resultloc: Loc,
  },
  Block { children: Vec<NodeId>, drops: Vec<DropEntry>, endloc: Loc },
  Call { recv: NodeId, args: Vec<NodeId>, argsendloc: Loc },
  TypeCons { texpr: NodeId, args: Vec<NodeId> },
  Id { name: Symbol, target: Option<NodeId> },
  /// Namespace expression: a name bound to an imported package.
  Ns { name: Symbol, pkg: Option<Arc<Pkg>> },
  Local {
    lkind: LocalKind,
    name: Symbol,
    nameloc: Loc,
    texpr: Option<NodeId>,
    init: Option<NodeId>,
    isthis: bool,  // [Param] the special "this" parameter
    ismut: bool,   // [Param] "this" parameter is "mut"
    offset: u64,   // [Field] memory offset in bytes
  },
  Member { recv: NodeId, name: Symbol, target: Option<NodeId> },
  Subscript { recv: NodeId, index: NodeId, index_val: u64, endloc: Loc },
  PrefixOp { op: Op, expr: NodeId },
  PostfixOp { op: Op, expr: NodeId },
  /// Implicit read through a reference (explicit form is `PrefixOp`).
  Deref { expr: NodeId },
  Binop { op: Op, left: NodeId, right: NodeId },
  Assign { op: Op, left: NodeId, right: NodeId },
  If { cond: NodeId, thenb: NodeId, elseb: Option<NodeId> },
  For { start: Option<NodeId>, cond: NodeId, body: NodeId, end: Option<NodeId> },
  Return { value: Option<NodeId> },
  BoolLit { val: bool },
  IntLit { val: u64 },
  FloatLit { val: f64 },
  StrLit { bytes: Box<[u8]> },
  ArrayLit { values: Vec<NodeId>, endloc: Loc },

  // type expressions (resolved to interned types during typecheck)
  TypeName { name: Symbol, resolved: Option<Ty> },
  TypePtr { elem: NodeId },
  TypeRef { elem: NodeId, ismut: bool },
  TypeSlice { elem: NodeId, ismut: bool, endloc: Loc },
  TypeOpt { elem: NodeId },
  TypeArray { elem: NodeId, len: Option<NodeId>, endloc: Loc },
  TypeFun { params: Vec<NodeId>, result: Option<NodeId> },
  TypeStructBody { fields: Vec<NodeId> },  // Local/Field nodes
  TypeInstance { recv: NodeId, args: Vec<NodeId>, endloc: Loc },
}

/// A node: shared header plus kind-specific payload.
#[derive(Debug, Clone)]
pub struct Node {
  pub kind: NodeKind,
  pub flags: NodeFlags,
  pub loc: Loc,
  /// The node's type; `Ty::UNKNOWN` until attached by the type checker.
  pub ty: Ty,
  /// Number of uses, for pruning.
  pub nuse: u32,
}

impl Node {
  #[must_use] pub fn new(kind: NodeKind, loc: Loc) -> Node {
    Node { kind, flags: NodeFlags::empty(), loc, ty: Ty::UNKNOWN, nuse: 0 }
  }

  #[must_use] pub fn is_expr(&self) -> bool {
    matches!(self.kind,
      NodeKind::Fun { .. } | NodeKind::Block { .. } | NodeKind::Call { .. } |
      NodeKind::TypeCons { .. } | NodeKind::Id { .. } | NodeKind::Ns { .. } |
      NodeKind::Local { .. } | NodeKind::Member { .. } |
      NodeKind::Subscript { .. } | NodeKind::PrefixOp { .. } |
      NodeKind::PostfixOp { .. } | NodeKind::Deref { .. } |
      NodeKind::Binop { .. } | NodeKind::Assign { .. } | NodeKind::If { .. } |
      NodeKind::For { .. } | NodeKind::Return { .. } |
      NodeKind::BoolLit { .. } | NodeKind::IntLit { .. } |
      NodeKind::FloatLit { .. } | NodeKind::StrLit { .. } |
      NodeKind::ArrayLit { .. })
  }

  #[must_use] pub fn is_local(&self) -> bool {
    matches!(self.kind, NodeKind::Local { .. })
  }

  #[must_use] pub fn is_type_expr(&self) -> bool {
    matches!(self.kind,
      NodeKind::TypeName { .. } | NodeKind::TypePtr { .. } |
      NodeKind::TypeRef { .. } | NodeKind::TypeSlice { .. } |
      NodeKind::TypeOpt { .. } | NodeKind::TypeArray { .. } |
      NodeKind::TypeFun { .. } | NodeKind::TypeStructBody { .. } |
      NodeKind::TypeInstance { .. })
  }

  /// True if materializing this node has no side effects.
  #[must_use] pub fn no_side_effects(&self) -> bool {
    matches!(self.kind,
      NodeKind::Id { .. } | NodeKind::BoolLit { .. } | NodeKind::IntLit { .. } |
      NodeKind::FloatLit { .. } | NodeKind::StrLit { .. })
  }
}

/// Per-unit node arena.
#[derive(Debug, Default)]
pub struct Ast {
  nodes: Vec<Node>,
}

impl Ast {
  #[must_use] pub fn new() -> Ast { Ast::default() }

  pub fn add(&mut self, node: Node) -> NodeId {
    let id = NodeId::from_usize(self.nodes.len());
    self.nodes.push(node);
    id
  }

  /// Transfer bubbling flags (`UNKNOWN`) from `child` to `parent`.
  pub fn bubble(&mut self, parent: NodeId, child: NodeId) {
    let f = self[child].flags & NODEFLAGS_BUBBLE;
    self[parent].flags |= f;
  }

  #[must_use] pub fn len(&self) -> usize { self.nodes.len() }
  #[must_use] pub fn is_empty(&self) -> bool { self.nodes.is_empty() }
}

impl std::ops::Index<NodeId> for Ast {
  type Output = Node;
  fn index(&self, id: NodeId) -> &Node { &self.nodes[id.into_usize()] }
}

impl std::ops::IndexMut<NodeId> for Ast {
  fn index_mut(&mut self, id: NodeId) -> &mut Node { &mut self.nodes[id.into_usize()] }
}

/// A parsed source file: the arena, the top-level statements and the
/// import list.
#[derive(Debug)]
pub struct Unit {
  pub ast: Ast,
  pub children: Vec<NodeId>,
  pub srcfile: Arc<SrcFile>,
  /// Head of the `next_import` chain of `Import` nodes.
  pub importlist: Option<NodeId>,
}

impl Unit {
  #[must_use] pub fn new(srcfile: Arc<SrcFile>) -> Unit {
    Unit { ast: Ast::new(), children: Vec::new(), srcfile, importlist: None }
  }

  /// Iterate the import list in declaration order.
  pub fn imports(&self) -> impl Iterator<Item = NodeId> + '_ {
    let mut cur = self.importlist;
    std::iter::from_fn(move || {
      let id = cur?;
      let NodeKind::Import { next_import, .. } = &self.ast[id].kind else {
        unreachable!("non-import in import list");
      };
      cur = *next_import;
      Some(id)
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn flags_vis() {
    let mut f = NodeFlags::empty();
    assert_eq!(f.vis(), Vis::Unit);
    f.upgrade_vis(Vis::Pkg);
    assert_eq!(f.vis(), Vis::Pkg);
    f.upgrade_vis(Vis::Unit); // no downgrade
    assert_eq!(f.vis(), Vis::Pkg);
    f.set_vis(Vis::Pub);
    assert_eq!(f.vis(), Vis::Pub);
  }

  #[test]
  fn bubble_unknown() {
    let mut ast = Ast::new();
    let child = ast.add(Node::new(NodeKind::Bad, Loc::UNKNOWN));
    let parent = ast.add(Node::new(NodeKind::Block {
      children: vec![child], drops: vec![], endloc: Loc::UNKNOWN,
    }, Loc::UNKNOWN));
    ast[child].flags |= NodeFlags::UNKNOWN | NodeFlags::RVALUE;
    ast.bubble(parent, child);
    assert!(ast[parent].flags.contains(NodeFlags::UNKNOWN));
    assert!(!ast[parent].flags.contains(NodeFlags::RVALUE));
  }
}
