//! The SSA IR data model: units, functions, blocks and values.
//!
//! Values and blocks are held in per-function index arenas; ids are
//! monotonically increasing and stable. A function's `order` lists blocks in
//! emission order, which can be changed (and blocks discarded from it)
//! without disturbing ids.

use arrayvec::ArrayVec;
use bitflags::bitflags;
use crate::Idx;
use crate::loc::Loc;
use crate::symbol::Symbol;
use crate::types::{Op, Ty};

#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValId(u32);

#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u32);

impl Idx for ValId {
  fn into_usize(self) -> usize { self.0 as usize }
  fn from_usize(n: usize) -> Self { ValId(n as u32) }
}

impl Idx for BlockId {
  fn into_usize(self) -> usize { self.0 as usize }
  fn from_usize(n: usize) -> Self { BlockId(n as u32) }
}

impl std::fmt::Debug for ValId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "v{}", self.0)
  }
}

impl std::fmt::Debug for BlockId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "b{}", self.0)
  }
}

bitflags! {
  #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
  pub struct IrFlags: u8 {
    /// [block] no more predecessors can be added; phis are final.
    const SEALED = 1 << 0;
  }
}

/// How a block is exited.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum BlockKind {
  /// Plain continuation with a single successor.
  #[default]
  Goto,
  /// No successors; the control value is the result.
  Ret,
  /// Two successors; `switch(control) goto succs[control]`.
  Switch,
}

/// Auxiliary payload of a value.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Aux {
  #[default]
  None,
  I64(u64),
  F64(f64),
  Bytes(Box<[u8]>),
  /// Index of a function in the containing unit (for `Op::Fun` values).
  FunIdx(u32),
  /// The block a pending phi belongs to.
  Block(BlockId),
}

impl Aux {
  #[must_use] pub fn as_i64(&self) -> u64 {
    match *self { Aux::I64(v) => v, _ => 0 }
  }
}

/// Variable liveness metadata attached to values by the ownership analysis.
#[derive(Debug, Clone, Default)]
pub struct VarInfo {
  /// Name of the synthesized boolean liveness variable, if any.
  pub live: Option<Symbol>,
  /// Variable this value was assigned to.
  pub dst: Option<Symbol>,
  /// Variable this value was derived (moved/copied) from.
  pub src: Option<Symbol>,
}

/// An SSA value.
#[derive(Debug, Clone)]
pub struct IrVal {
  pub op: Op,
  pub ty: Ty,
  pub loc: Loc,
  pub nuse: u32,
  pub args: ArrayVec<ValId, 3>,
  pub aux: Aux,
  pub var: VarInfo,
  pub comment: Option<Box<str>>,
}

impl IrVal {
  #[must_use] pub fn new(op: Op, ty: Ty, loc: Loc) -> IrVal {
    IrVal {
      op, ty, loc,
      nuse: 0,
      args: ArrayVec::new(),
      aux: Aux::None,
      var: VarInfo::default(),
      comment: None,
    }
  }
}

/// A basic block.
#[derive(Debug, Clone, Default)]
pub struct IrBlock {
  pub kind: BlockKind,
  pub flags: IrFlags,
  pub loc: Loc,
  pub preds: [Option<BlockId>; 2],
  pub succs: [Option<BlockId>; 2],
  /// Values in program order. Value storage lives in [`IrFun::vals`].
  pub values: Vec<ValId>,
  /// Determines how the block is exited: the boolean scrutinee of a
  /// `Switch`, or the result of a `Ret`.
  pub control: Option<ValId>,
  pub comment: Option<Box<str>>,
}

impl IrBlock {
  #[must_use] pub fn npreds(&self) -> u32 {
    debug_assert!(self.preds[1].is_none() || self.preds[0].is_some());
    self.preds.iter().flatten().count() as u32
  }

  #[must_use] pub fn nsuccs(&self) -> u32 {
    debug_assert!(self.succs[1].is_none() || self.succs[0].is_some());
    self.succs.iter().flatten().count() as u32
  }

  #[must_use] pub fn is_sealed(&self) -> bool {
    self.flags.contains(IrFlags::SEALED)
  }
}

/// A function under or after construction.
#[derive(Debug, Default)]
pub struct IrFun {
  pub name: String,
  pub ty: Ty,
  /// Value storage, indexed by [`ValId`]; ids increase monotonically.
  pub vals: Vec<IrVal>,
  /// Block storage, indexed by [`BlockId`]; never shrinks.
  pub blocks: Vec<IrBlock>,
  /// Emission order; discarded blocks are absent.
  pub order: Vec<BlockId>,
  /// Number of function calls this function makes.
  pub ncalls: u32,
  /// Calls to functions marked pure.
  pub npurecalls: u32,
  /// Writes to globals.
  pub nglobalw: u32,
}

impl IrFun {
  pub fn add_val(&mut self, v: IrVal) -> ValId {
    let id = ValId::from_usize(self.vals.len());
    self.vals.push(v);
    id
  }

  pub fn add_block(&mut self, b: IrBlock) -> BlockId {
    let id = BlockId::from_usize(self.blocks.len());
    self.blocks.push(b);
    self.order.push(id);
    id
  }

  #[must_use] pub fn entry(&self) -> BlockId {
    *self.order.first().expect("function without entry block")
  }

  /// The block containing `v`, scanning in order.
  #[must_use] pub fn block_of(&self, v: ValId) -> Option<BlockId> {
    self.order.iter().copied().find(|&b| self.blocks[b.into_usize()].values.contains(&v))
  }
}

impl std::ops::Index<ValId> for IrFun {
  type Output = IrVal;
  fn index(&self, id: ValId) -> &IrVal { &self.vals[id.into_usize()] }
}

impl std::ops::IndexMut<ValId> for IrFun {
  fn index_mut(&mut self, id: ValId) -> &mut IrVal { &mut self.vals[id.into_usize()] }
}

impl std::ops::Index<BlockId> for IrFun {
  type Output = IrBlock;
  fn index(&self, id: BlockId) -> &IrBlock { &self.blocks[id.into_usize()] }
}

impl std::ops::IndexMut<BlockId> for IrFun {
  fn index_mut(&mut self, id: BlockId) -> &mut IrBlock {
    &mut self.blocks[id.into_usize()]
  }
}

/// The IR of one compilation unit, consumed by code generation.
#[derive(Debug, Default)]
pub struct IrUnit {
  pub funs: Vec<IrFun>,
  pub srcfile_name: String,
}
