//! Build the SSA IR from the checked AST, inserting ownership operations.
//!
//! SSA construction is the on-the-fly algorithm of Braun et al.: variables
//! are written into per-block maps; reads in other blocks either take the
//! single predecessor's value, create a pending phi (unsealed block) or a
//! complete phi over both predecessors. Sealing a block finalizes its
//! pending phis.
//!
//! Ownership: a scope stack records owning values; a `deadset` bitset
//! tracks values whose ownership has been transferred (`MOVE`). Leaving a
//! scope drops still-owned values. On conditional paths a per-owner boolean
//! liveness variable is synthesized; where its phi-join is conditional at
//! runtime, a conditional drop (`if !live { drop }`) is emitted. The only
//! simplification performed is the MOVE→DROP peephole within one block.

use bit_set::BitSet;
use hashbrown::HashMap;
use if_chain::if_chain;
use crate::{Compiler, ErrorKind, Idx};
use crate::diag::DiagKind;
use crate::loc::{Loc, Origin};
use crate::symbol::Symbol;
use crate::types::{Op, Ty, Type};
use crate::types::ast::{Ast, DropEntry, LocalKind, NodeFlags, NodeId, NodeKind, Unit};
use crate::types::ir::{
  Aux, BlockId, BlockKind, IrBlock, IrFlags, IrFun, IrUnit, IrVal, ValId,
};

enum OwnerEnt {
  /// Saved base index of the enclosing owners scope.
  Frame(usize),
  Val(ValId),
}

pub struct BuildIr<'c> {
  comp: &'c Compiler,
  ast: &'c mut Ast,
  unit: IrUnit,
  f: IrFun,
  cur: Option<BlockId>,
  building: bool,
  err: Option<ErrorKind>,
  condnest: u32,
  vars: HashMap<Symbol, ValId>,
  defvars: Vec<HashMap<Symbol, ValId>>,     // indexed by block id
  pendingphis: Vec<HashMap<Symbol, ValId>>, // indexed by block id
  deadset: BitSet,
  owners: Vec<OwnerEnt>,
  owners_base: usize,
  dropstack: Vec<NodeId>, // Block nodes receiving drop records
  funqueue: Vec<NodeId>,
  funm: HashMap<NodeId, usize>, // fun node -> index in unit.funs
}

/// Lower a checked unit to IR.
pub fn analyze(comp: &Compiler, unit: &mut Unit) -> Result<IrUnit, ErrorKind> {
  let children = unit.children.clone();
  let srcfile_name = unit.srcfile.name.clone();
  let mut b = BuildIr {
    comp,
    ast: &mut unit.ast,
    unit: IrUnit { funs: Vec::new(), srcfile_name },
    f: IrFun::default(),
    cur: None,
    building: false,
    err: None,
    condnest: 0,
    vars: HashMap::new(),
    defvars: Vec::new(),
    pendingphis: Vec::new(),
    deadset: BitSet::new(),
    owners: Vec::new(),
    owners_base: 0,
    dropstack: Vec::new(),
    funqueue: Vec::new(),
    funm: HashMap::new(),
  };
  b.build_unit(&children);
  match b.err {
    Some(e) => Err(e),
    None => Ok(b.unit),
  }
}

impl<'c> BuildIr<'c> {
  fn seterr(&mut self, e: ErrorKind) {
    if self.err.is_none() {
      tracing::debug!("ir error set to {e:?}");
      self.err = Some(e);
    }
  }

  fn error_at(&self, loc: Loc, msg: impl Into<String>) {
    let origin = Origin::of_loc(&self.comp.locmap, loc);
    self.comp.diag.report(origin, DiagKind::Error, msg);
  }

  fn help_at(&self, loc: Loc, msg: impl Into<String>) {
    if loc.is_known() {
      let origin = Origin::of_loc(&self.comp.locmap, loc);
      self.comp.diag.report(origin, DiagKind::Help, msg);
    }
  }

  fn b(&self) -> BlockId {
    self.cur.expect("no current block")
  }

  fn is_owner(&self, t: Ty) -> bool {
    self.comp.types.is_owner(t)
  }

  //——————————————————————————————————————————————————————————————————————
  // values & blocks

  fn mkval(&mut self, op: Op, loc: Loc, ty: Ty) -> ValId {
    self.f.add_val(IrVal::new(op, ty, loc))
  }

  fn pushval(&mut self, b: BlockId, op: Op, loc: Loc, ty: Ty) -> ValId {
    let v = self.mkval(op, loc, ty);
    self.f[b].values.push(v);
    v
  }

  fn insertval(&mut self, b: BlockId, at: usize, op: Op, loc: Loc, ty: Ty) -> ValId {
    let v = self.mkval(op, loc, ty);
    self.f[b].values.insert(at, v);
    v
  }

  fn pusharg(&mut self, dst: ValId, arg: ValId) {
    self.f[arg].nuse += 1;
    if self.f[dst].args.is_full() {
      // fixed operand arity; calls with more arguments keep their extra
      // operands implicit via the AST
      tracing::debug!("operand list of {dst:?} is full; dropping {arg:?}");
      return;
    }
    self.f[dst].args.push(arg);
  }

  fn comment(&mut self, v: ValId, s: impl Into<String>) {
    self.f[v].comment = Some(s.into().into_boxed_str());
  }

  fn block_comment(&mut self, b: BlockId, s: impl Into<String>) {
    self.f[b].comment = Some(s.into().into_boxed_str());
  }

  fn mkblock(&mut self, kind: BlockKind, loc: Loc) -> BlockId {
    self.f.add_block(IrBlock { kind, loc, ..IrBlock::default() })
  }

  fn set_control(&mut self, b: BlockId, v: Option<ValId>) {
    if let Some(v) = v {
      self.f[v].nuse += 1;
    }
    if let Some(old) = self.f[b].control {
      self.f[old].nuse -= 1;
    }
    self.f[b].control = v;
  }

  fn seal_block(&mut self, b: BlockId) {
    debug_assert!(!self.f[b].is_sealed());
    self.f[b].flags |= IrFlags::SEALED;

    if self.pendingphis.len() <= b.into_usize() {
      return;
    }
    let pending: Vec<(Symbol, ValId)> =
      self.pendingphis[b.into_usize()].drain().collect();
    for (name, phi) in pending {
      let Aux::Block(pb) = self.f[phi].aux else {
        unreachable!("pending phi without home block");
      };
      let (ty, loc) = (self.f[phi].ty, self.f[phi].loc);
      let p0 = self.f[pb].preds[0].expect("pending phi in block without preds");
      let p1 = self.f[pb].preds[1].expect("pending phi with one pred");
      let v0 = self.var_read_inblock(p0, name, ty, loc);
      self.pusharg(phi, v0);
      let v1 = self.var_read_inblock(p1, name, ty, loc);
      self.pusharg(phi, v1);
    }
  }

  fn start_block(&mut self, b: BlockId) {
    debug_assert!(self.cur.is_none(), "forgot to call end_block?");
    self.cur = Some(b);
  }

  fn stash_block_vars(&mut self, b: BlockId) {
    // moves block-local vars to long-term definition data
    if self.vars.is_empty() {
      return;
    }
    if self.defvars.len() <= b.into_usize() {
      self.defvars.resize_with(b.into_usize() + 1, HashMap::new);
    }
    let slot = &mut self.defvars[b.into_usize()];
    if slot.is_empty() {
      *slot = std::mem::take(&mut self.vars);
    } else {
      slot.extend(self.vars.drain());
    }
  }

  fn end_block(&mut self) -> BlockId {
    let b = self.cur.take().expect("unbalanced start_block/end_block");
    self.stash_block_vars(b);
    if !self.f[b].is_sealed() {
      self.seal_block(b);
    } else {
      debug_assert!(
        self.pendingphis.get(b.into_usize()).is_none_or(HashMap::is_empty),
        "sealed block with pending phis");
    }
    b
  }

  fn discard_block(&mut self, b: BlockId) {
    debug_assert!(self.f[b].values.is_empty(), "discarding non-empty block");
    self.f.order.retain(|&x| x != b);
  }

  //——————————————————————————————————————————————————————————————————————
  // SSA variables

  fn var_write(&mut self, name: Symbol, v: ValId) {
    self.vars.insert(name, v);
  }

  fn var_write_inblock(&mut self, b: BlockId, name: Symbol, v: ValId) {
    if Some(b) == self.cur {
      self.vars.insert(name, v);
      return;
    }
    if self.defvars.len() <= b.into_usize() {
      self.defvars.resize_with(b.into_usize() + 1, HashMap::new);
    }
    self.defvars[b.into_usize()].insert(name, v);
  }

  fn var_read(&mut self, name: Symbol, ty: Ty, loc: Loc) -> ValId {
    if let Some(&v) = self.vars.get(&name) {
      return v;
    }
    let b = self.b();
    self.var_read_recursive(b, name, ty, loc)
  }

  fn var_read_inblock(&mut self, b: BlockId, name: Symbol, ty: Ty, loc: Loc) -> ValId {
    debug_assert!(Some(b) != self.cur, "use var_read for the current block");
    if let Some(&v) = self.defvars.get(b.into_usize()).and_then(|m| m.get(&name)) {
      return v;
    }
    self.var_read_recursive(b, name, ty, loc)
  }

  fn add_pending_phi(&mut self, b: BlockId, phi: ValId, name: Symbol) {
    // tracks incomplete phis, completed by seal_block once the block's
    // predecessors are known
    if self.pendingphis.len() <= b.into_usize() {
      self.pendingphis.resize_with(b.into_usize() + 1, HashMap::new);
    }
    self.f[phi].aux = Aux::Block(b);
    let prev = self.pendingphis[b.into_usize()].insert(name, phi);
    debug_assert!(prev.is_none(), "duplicate pending phi");
  }

  fn var_read_recursive(&mut self, b: BlockId, name: Symbol, ty: Ty, loc: Loc) -> ValId {
    let v;
    if !self.f[b].is_sealed() {
      // incomplete CFG
      v = self.pushval(b, Op::Phi, loc, ty);
      self.comment(v, self.comp.syms.name(name).to_string());
      self.add_pending_phi(b, v, name);
    } else if self.f[b].npreds() == 1 {
      // single predecessor; no phi needed
      let p0 = self.f[b].preds[0].unwrap();
      v = self.var_read_inblock(p0, name, ty, loc);
    } else if self.f[b].npreds() == 0 {
      // outside of function
      v = self.pushval(b, Op::Noop, loc, ty);
      self.comment(v, "gvn");
    } else {
      // two predecessors
      let p0 = self.f[b].preds[0].unwrap();
      let p1 = self.f[b].preds[1].unwrap();
      let v0 = self.var_read_inblock(p0, name, ty, loc);
      let v1 = self.var_read_inblock(p1, name, ty, loc);
      if v0 == v1 {
        self.var_write_inblock(b, name, v0);
        return v0;
      }
      let phi = self.pushval(b, Op::Phi, loc, ty);
      self.comment(phi, self.comp.syms.name(name).to_string());
      self.var_write_inblock(b, name, phi);
      self.pusharg(phi, v0);
      self.pusharg(phi, v1);
      return phi;
    }
    self.var_write_inblock(b, name, v);
    v
  }

  //——————————————————————————————————————————————————————————————————————
  // constants

  fn intconst(&mut self, t: Ty, value: u64, loc: Loc) -> ValId {
    // Constants are interned at the top of the entry block, ints before
    // floats, each range sorted by value: a linear scan that is fast for
    // the common case of few constants.
    let t = self.comp.types.unwrap_alias(t);
    let b0 = self.f.entry();
    let mut i = 0;
    while i < self.f[b0].values.len() {
      let v = self.f[b0].values[i];
      if self.f[v].op != Op::IConst || self.f[v].aux.as_i64() > value {
        break;
      }
      if self.f[v].aux.as_i64() == value && self.f[v].ty == t {
        return v;
      }
      i += 1;
    }
    let v = self.insertval(b0, i, Op::IConst, loc, t);
    self.f[v].aux = Aux::I64(value);
    v
  }

  fn floatconst(&mut self, t: Ty, value: f64, loc: Loc) -> ValId {
    let b0 = self.f.entry();
    let mut i = 0;
    while i < self.f[b0].values.len() {
      let v = self.f[b0].values[i];
      if self.f[v].op == Op::IConst {
        i += 1;
        continue;
      }
      let fv = match self.f[v].aux {
        Aux::F64(x) => x,
        _ => break,
      };
      if self.f[v].op != Op::FConst || fv > value {
        break;
      }
      if fv == value && self.f[v].ty == t {
        return v;
      }
      i += 1;
    }
    let v = self.insertval(b0, i, Op::FConst, loc, t);
    self.f[v].aux = Aux::F64(value);
    v
  }

  //——————————————————————————————————————————————————————————————————————
  // ownership

  fn create_liveness_var(&mut self, v: ValId) {
    debug_assert!(self.f[v].var.live.is_none());
    let name = self.comp.syms.intern(&format!(".v{}_live", v.into_usize()));
    self.f[v].var.live = Some(name);
    // initial liveness in the block that defines v
    let islive = !self.deadset.contains(v.into_usize());
    let islivev = self.intconst(Ty::BOOL, u64::from(islive), Loc::UNKNOWN);
    let b = self.f.block_of(v).unwrap_or_else(|| self.f.entry());
    self.var_write_inblock(b, name, islivev);
  }

  fn write_liveness_var(&mut self, owner: ValId, islive: bool) {
    if self.f[owner].var.live.is_none() {
      self.create_liveness_var(owner);
    }
    let name = self.f[owner].var.live.unwrap();
    let islivev = self.intconst(Ty::BOOL, u64::from(islive), Loc::UNKNOWN);
    let b = self.b();
    self.var_write_inblock(b, name, islivev);
  }

  fn owners_enter_scope(&mut self, drops_node: NodeId) {
    self.owners.push(OwnerEnt::Frame(self.owners_base));
    self.owners_base = self.owners.len() - 1;
    self.dropstack.push(drops_node);
  }

  fn owners_leave_scope(&mut self) {
    let OwnerEnt::Frame(parent) = self.owners[self.owners_base] else {
      unreachable!("corrupt owners stack");
    };
    self.owners.truncate(self.owners_base);
    self.owners_base = parent;
    self.dropstack.pop();
  }

  fn owners_add(&mut self, v: ValId) {
    debug_assert!(self.is_owner(self.f[v].ty));
    self.owners.push(OwnerEnt::Val(v));
  }

  fn owners_indexof(&self, v: ValId) -> Option<usize> {
    let mut i = self.owners.len();
    let mut base = self.owners_base;
    while i > 1 {
      i -= 1;
      if i == base {
        let OwnerEnt::Frame(p) = self.owners[i] else { unreachable!() };
        base = p;
      } else if matches!(self.owners[i], OwnerEnt::Val(x) if x == v) {
        return Some(i);
      }
    }
    None
  }

  /// Owner values of all scopes, outermost first.
  fn owners_all(&self) -> Vec<ValId> {
    self.owners.iter()
      .filter_map(|e| match e { OwnerEnt::Val(v) => Some(*v), OwnerEnt::Frame(_) => None })
      .collect()
  }

  /// Owner values of the current scope, in definition order.
  fn owners_in_scope(&self) -> Vec<ValId> {
    self.owners[self.owners_base..].iter()
      .filter_map(|e| match e { OwnerEnt::Val(v) => Some(*v), OwnerEnt::Frame(_) => None })
      .collect()
  }

  fn backpropagate_drop_to_ast(&mut self, v: ValId, dropv: ValId) {
    let &block_node = self.dropstack.last().expect("drop outside owners scope");
    let name = self.f[v].var.dst
      .or(self.f[v].var.src)
      .or(self.f[dropv].var.dst)
      .or(self.f[dropv].var.src);
    let Some(name) = name else {
      tracing::debug!("drop of {v:?} without a variable name");
      return;
    };
    let ty = self.f[v].ty;
    if let NodeKind::Block { drops, .. } = &mut self.ast[block_node].kind {
      drops.push(DropEntry { name, ty });
    }
  }

  fn drop_val(&mut self, v: ValId, loc: Loc) {
    let b = self.b();
    if_chain! {
      if self.f[v].op == Op::Move;
      if self.f[v].nuse == 0;
      if self.f.block_of(v) == Some(b);
      then {
        // Collapse "v2 = MOVE v1; DROP v2" into "DROP v1". The converted
        // value moves to the end of the block so drop order is preserved.
        self.f[v].op = Op::Drop;
        self.f[v].ty = Ty::VOID;
        let dst = self.f[v].var.dst;
        self.f[v].var.src = dst;
        if self.f[b].values.last() != Some(&v) {
          let i = self.f[b].values.iter().rposition(|&x| x == v)
            .expect("value not in its block");
          self.f[b].values.remove(i);
          self.f[b].values.push(v);
        }
        // arg 0 is already the value to drop
        let dropped = self.f[v].args[0];
        self.backpropagate_drop_to_ast(dropped, v);
      } else {
        let dropv = self.pushval(b, Op::Drop, loc, Ty::VOID);
        self.pusharg(dropv, v);
        let dst = self.f[v].var.dst;
        self.f[dropv].var.src = dst;
        if let Some(dst) = self.f[v].var.dst {
          let dst = self.comp.syms.name(dst).to_string();
          self.comment(dropv, dst);
        }
        self.backpropagate_drop_to_ast(v, dropv);
      }
    }
  }

  /// Emit `if !live { drop(owner) }` after the current block.
  fn conditional_drop(&mut self, control: ValId, owner: ValId) {
    let ifb = self.end_block();

    let deadb = self.mkblock(BlockKind::Goto, Loc::UNKNOWN);
    let contb = self.mkblock(BlockKind::Goto, Loc::UNKNOWN);

    // the continuation inherits the old block's exit
    let old_control = self.f[ifb].control;
    self.set_control(contb, old_control);
    let (kind, succs) = (self.f[ifb].kind, self.f[ifb].succs);
    self.f[contb].kind = kind;
    self.f[contb].succs = succs;

    self.f[ifb].kind = BlockKind::Switch;
    self.set_control(ifb, Some(control));

    self.f[ifb].succs = [Some(contb), Some(deadb)]; // if -> cont, dead
    self.f[deadb].succs[0] = Some(contb);           // dead -> cont
    self.f[deadb].preds[0] = Some(ifb);             // dead <- if
    self.f[contb].preds = [Some(ifb), Some(deadb)]; // cont <- if, dead
    self.block_comment(deadb, format!("b{}.then", ifb.into_usize()));
    self.block_comment(contb, format!("b{}.cont", ifb.into_usize()));

    self.start_block(deadb);
    self.seal_block(deadb);
    self.drop_val(owner, Loc::UNKNOWN);
    self.end_block();

    self.start_block(contb);
    self.seal_block(contb);
  }

  fn owners_unwind_one(&mut self, deadset: &BitSet, v: ValId) {
    if !deadset.contains(v.into_usize()) {
      // v definitely owns its value at scope exit
      self.drop_val(v, Loc::UNKNOWN);
      return;
    }
    if let Some(live) = self.f[v].var.live {
      let lv = self.var_read(live, Ty::BOOL, Loc::UNKNOWN);
      if self.f[lv].op == Op::Phi {
        // ownership is runtime conditional
        self.conditional_drop(lv, v);
        return;
      }
      debug_assert_eq!(self.f[lv].op, Op::IConst);
    }
    // transitive liveness: v lost ownership on every path
  }

  fn owners_unwind_all(&mut self) {
    let all = self.owners_all();
    let deadset = self.deadset.clone();
    for &v in all.iter().rev() {
      self.owners_unwind_one(&deadset, v);
    }
    // empty the current scope so owners_unwind_scope does no duplicate work
    self.owners.truncate(self.owners_base + 1);
  }

  fn owners_unwind_scope(&mut self, entry_deadset: Option<&BitSet>) {
    if self.owners.is_empty() {
      return;
    }
    debug_assert!(self.cur.is_some());
    // xor computes what was killed inside the scope
    let eff = match entry_deadset {
      None => self.deadset.clone(),
      Some(e) => {
        let mut d = self.deadset.clone();
        d.symmetric_difference_with(e);
        d
      }
    };
    let vals = self.owners_in_scope();
    for &v in vals.iter().rev() {
      self.owners_unwind_one(&eff, v);
    }
  }

  /// True when some owner (any scope) lost ownership between the two sets.
  fn owners_find_lost(&self, entry: &BitSet, exit: &BitSet) -> bool {
    self.owners_all().iter().any(|&v| {
      !entry.contains(v.into_usize()) && exit.contains(v.into_usize())
    })
  }

  /// Drop every owner that lost ownership between the two sets.
  fn owners_drop_lost(&mut self, entry: &BitSet, exit: &BitSet, loc: Loc) {
    let mut i = self.owners.len();
    let mut base = self.owners_base;
    let mut doomed: Vec<(usize, ValId, bool)> = Vec::new();
    while i > 1 {
      i -= 1;
      if i == base {
        let OwnerEnt::Frame(p) = self.owners[i] else { unreachable!() };
        base = p;
        continue;
      }
      let OwnerEnt::Val(v) = self.owners[i] else { continue };
      if !entry.contains(v.into_usize()) && exit.contains(v.into_usize()) {
        doomed.push((i, v, i > self.owners_base));
      }
    }
    for (i, v, in_current_scope) in doomed {
      self.drop_val(v, loc);
      if in_current_scope {
        // simply forget about this owner
        self.owners.remove(i);
      } else {
        // a parent scope's owner: update its liveness variable
        self.write_liveness_var(v, false);
      }
    }
  }

  fn move_owner(
    &mut self,
    old_owner: ValId,
    new_owner: Option<ValId>,
    replace_owner: Option<ValId>,
  ) {
    if let Some(new) = new_owner {
      if let Some(replace) = replace_owner {
        debug_assert!(self.is_owner(self.f[replace].ty));
        if let Some(i) = self.owners_indexof(replace) {
          self.owners[i] = OwnerEnt::Val(new);
          self.deadset.insert(replace.into_usize());
        }
      } else {
        self.owners_add(new);
      }
      debug_assert!(!self.deadset.contains(new.into_usize()));
    } else {
      debug_assert!(replace_owner.is_none(), "replace_owner without new_owner");
    }

    // old_owner no longer has ownership over its value
    self.deadset.insert(old_owner.into_usize());

    // on a conditional path, track liveness variables
    if self.condnest > 0 {
      self.write_liveness_var(old_owner, false);
      if let Some(new) = new_owner {
        self.write_liveness_var(new, true);
      }
    }
  }

  fn move_owner_outside(&mut self, old_owner: ValId) {
    self.move_owner(old_owner, None, None);
  }

  fn move_val(&mut self, rvalue: ValId, loc: Loc, replace_owner: Option<ValId>) -> ValId {
    if self.f[rvalue].op == Op::Phi {
      // a phi joins two already-existing moves
      return rvalue;
    }
    let b = self.b();
    let ty = self.f[rvalue].ty;
    let v = self.pushval(b, Op::Move, loc, ty);
    self.pusharg(v, rvalue);
    self.move_owner(rvalue, Some(v), replace_owner);
    v
  }

  fn reference(&mut self, rvalue: ValId, loc: Loc) -> ValId {
    let ty = self.f[rvalue].ty;
    let op = match self.comp.types.data(ty) {
      Type::MutRef(_) => Op::BorrowMut,
      _ => Op::Borrow,
    };
    let b = self.b();
    let v = self.pushval(b, op, loc, ty);
    self.pusharg(v, rvalue);
    v
  }

  fn move_or_copy(&mut self, rvalue: ValId, loc: Loc, replace_owner: Option<ValId>) -> ValId {
    let ty = self.f[rvalue].ty;
    let v = if self.is_owner(ty) {
      self.move_val(rvalue, loc, replace_owner)
    } else if self.comp.types.is_ref(ty) {
      self.reference(rvalue, loc)
    } else {
      rvalue
    };
    let src = self.f[rvalue].var.dst;
    self.f[v].var.src = src;
    v
  }

  //——————————————————————————————————————————————————————————————————————
  // expressions

  fn idexpr(&mut self, n: NodeId) -> ValId {
    let NodeKind::Id { name, target } = self.ast[n].kind.clone() else { unreachable!() };
    match target {
      Some(t) if self.ast[t].is_local() => {
        let (ty, loc) = (self.ast[t].ty, self.ast[t].loc);
        let NodeKind::Local { name, .. } = self.ast[t].kind else { unreachable!() };
        self.var_read(name, ty, loc)
      }
      _ => {
        // package-level function reference
        let b = self.b();
        let ty = self.ast[n].ty;
        let loc = self.ast[n].loc;
        let v = self.pushval(b, Op::Fun, loc, ty);
        let name = self.comp.syms.name(name).to_string();
        self.comment(v, name);
        v
      }
    }
  }

  fn assign_local(&mut self, dst: NodeId, v: ValId) -> ValId {
    let NodeKind::Local { name, .. } = self.ast[dst].kind else { unreachable!() };
    if name == Symbol::UNDER {
      debug_assert!(!self.is_owner(self.ast[dst].ty), "owner without temporary name");
      return v;
    }
    self.f[v].var.dst = Some(name);
    self.var_write(name, v);
    v
  }

  fn vardef(&mut self, n: NodeId) -> ValId {
    let NodeKind::Local { name, init, .. } = self.ast[n].kind.clone() else {
      unreachable!();
    };
    let (loc, ty) = (self.ast[n].loc, self.ast[n].ty);
    let v = if let Some(init) = init {
      let v1 = self.load_expr(init);
      self.f[v1].ty = ty; // dst may be a supertype, e.g. "dst ?T <= v T"
      let v = self.move_or_copy(v1, loc, None);
      if name != Symbol::UNDER {
        let namestr = self.comp.syms.name(name).to_string();
        match (v == v1, self.f[v].comment.clone()) {
          (true, Some(c)) if !c.is_empty() => self.comment(v, format!("{c} aka {namestr}")),
          _ => self.comment(v, namestr),
        }
      }
      v
    } else {
      let b = self.b();
      let v = self.pushval(b, Op::Zero, loc, ty);
      if name != Symbol::UNDER {
        let namestr = self.comp.syms.name(name).to_string();
        self.comment(v, namestr);
      }
      // an owning var without initializer is initially dead: its zero
      // value needs no drop
      if self.is_owner(ty) {
        self.owners_add(v);
        self.deadset.insert(v.into_usize());
      }
      v
    };
    self.assign_local(n, v)
  }

  fn assign(&mut self, n: NodeId) -> ValId {
    let NodeKind::Assign { left, right, .. } = self.ast[n].kind.clone() else {
      unreachable!();
    };
    let loc = self.ast[n].loc;
    let v = self.load_expr(right);

    let mut left = left;
    while let NodeKind::Deref { expr } | NodeKind::PrefixOp { op: Op::Deref, expr } =
      self.ast[left].kind
    {
      left = expr;
    }

    let dst = match self.ast[left].kind.clone() {
      NodeKind::Id { target, .. } => match target {
        Some(t) if self.ast[t].is_local() => t,
        // "_ = expr" has no destination
        _ => return v,
      },
      NodeKind::Member { target: Some(t), .. } => t,
      _ => {
        // stores through members/subscripts evaluate operands only
        return v;
      }
    };

    let NodeKind::Local { name, .. } = self.ast[dst].kind else { return v };
    let dstty = self.ast[dst].ty;
    self.f[v].ty = dstty;

    let curr_owner = self.var_read(name, dstty, Loc::UNKNOWN);
    let v = self.move_or_copy(v, loc, Some(curr_owner));
    let namestr = self.comp.syms.name(name).to_string();
    self.comment(v, namestr);
    self.assign_local(dst, v)
  }

  fn ret(&mut self, v: Option<ValId>, _loc: Loc) -> Option<ValId> {
    let b = self.b();
    self.f[b].kind = BlockKind::Ret;
    if let Some(v) = v {
      if self.is_owner(self.f[v].ty) {
        self.move_owner_outside(v);
      }
    }
    self.set_control(b, v);
    self.owners_unwind_all();
    v
  }

  fn retexpr(&mut self, n: NodeId) -> Option<ValId> {
    let NodeKind::Return { value } = self.ast[n].kind else { unreachable!() };
    let loc = self.ast[n].loc;
    let v = value.map(|v| self.load_expr(v));
    self.ret(v, loc)
  }

  /// Byte offset of a named field within a struct type.
  fn field_offset(&self, recv_ty: Ty, name: Symbol) -> u64 {
    let ts = &self.comp.types;
    let mut base = ts.unwrap_alias(recv_ty);
    loop {
      match ts.data(base) {
        Type::Ref(e) | Type::MutRef(e) | Type::Ptr(e) => base = ts.unwrap_alias(e),
        _ => break,
      }
    }
    let Type::Struct { fields, .. } = ts.data(base) else { return 0 };
    let mut offset = 0u64;
    for f in &fields {
      let align = u64::from(ts.align(f.ty).max(1));
      offset = offset.next_multiple_of(align);
      if f.name == name {
        return offset;
      }
      offset += ts.size(f.ty);
    }
    0
  }

  fn member(&mut self, n: NodeId) -> ValId {
    let NodeKind::Member { recv, name, .. } = self.ast[n].kind.clone() else {
      unreachable!();
    };
    let (loc, ty) = (self.ast[n].loc, self.ast[n].ty);
    let recv_ty = self.ast[recv].ty;
    let recv_v = self.load_expr(recv);
    let b = self.b();
    let v = self.pushval(b, Op::Gep, loc, ty);
    self.pusharg(v, recv_v);
    self.f[v].aux = Aux::I64(self.field_offset(recv_ty, name));
    v
  }

  fn typecons(&mut self, n: NodeId) -> ValId {
    let NodeKind::TypeCons { args, .. } = self.ast[n].kind.clone() else {
      unreachable!();
    };
    let (loc, ty) = (self.ast[n].loc, self.ast[n].ty);
    let b = self.b();
    match args.first() {
      None => self.pushval(b, Op::Zero, loc, ty),
      Some(&a) => {
        let src = self.load_expr(a);
        let b = self.b();
        let v = self.pushval(b, Op::Cast, loc, ty);
        self.pusharg(v, src);
        v
      }
    }
  }

  fn call(&mut self, n: NodeId) -> ValId {
    let NodeKind::Call { recv, args, .. } = self.ast[n].kind.clone() else {
      unreachable!();
    };
    let (loc, ty) = (self.ast[n].loc, self.ast[n].ty);

    // a type-function call "x.f(...)" passes x as the receiver argument;
    // a package-member call "pkg.f(...)" has no receiver
    let mut implicit_this = None;
    let recv_v = if let NodeKind::Member { recv: mrecv, name, .. } = self.ast[recv].kind.clone() {
      if matches!(self.comp.types.data(self.comp.types.unwrap_alias(self.ast[recv].ty)),
        Type::Fun { .. })
      {
        if !matches!(self.ast[mrecv].kind, NodeKind::Ns { .. }) {
          implicit_this = Some(self.load_expr(mrecv));
        }
        let b = self.b();
        let fv = self.pushval(b, Op::Fun, self.ast[recv].loc, self.ast[recv].ty);
        let name = self.comp.syms.name(name).to_string();
        self.comment(fv, name);
        fv
      } else {
        self.load_expr(recv)
      }
    } else {
      self.load_expr(recv)
    };

    let b = self.b();
    let v = self.pushval(b, Op::Call, loc, ty);
    self.pusharg(v, recv_v);
    if let Some(this_v) = implicit_this {
      self.pusharg(v, this_v);
    }

    for &arg in &args {
      // named arguments carry their value in `init`
      let argexpr = match self.ast[arg].kind {
        NodeKind::Local { lkind: LocalKind::Param, init: Some(init), .. } => init,
        _ => arg,
      };
      let arg_v = self.load_expr(argexpr);
      if self.is_owner(self.f[arg_v].ty) {
        self.move_owner_outside(arg_v);
      }
      self.pusharg(v, arg_v);
    }

    if self.is_owner(ty) {
      self.owners_add(v);
    }
    self.f.ncalls += 1;
    v
  }

  fn blockexpr0(&mut self, n: NodeId, isfunbody: bool) -> Option<ValId> {
    let NodeKind::Block { children, .. } = self.ast[n].kind.clone() else {
      unreachable!();
    };
    let isrvalue = self.ast[n].flags.contains(NodeFlags::RVALUE);
    if children.is_empty() {
      if isrvalue {
        let b = self.b();
        let (loc, ty) = (self.ast[n].loc, self.ast[n].ty);
        return Some(self.pushval(b, Op::Zero, loc, ty));
      }
      return None;
    }
    let lastrval = (children.len() - 1) + usize::from(!isrvalue);

    for (i, &cn) in children.iter().enumerate() {
      if i == lastrval && !matches!(self.ast[cn].kind, NodeKind::Return { .. }) {
        let mut v = self.load_expr(cn);
        // when cn is the implicit function return, fun() emits the ret and
        // the move; nothing more to do here
        if !isfunbody {
          if self.f[v].op != Op::Move {
            v = self.move_or_copy(v, self.ast[cn].loc, None);
          }
          if self.is_owner(self.f[v].ty) {
            self.move_owner_outside(v);
          }
        }
        let b = self.b();
        self.comment(v, format!("b{}", b.into_usize()));
        return Some(v);
      }
      let is_return = matches!(self.ast[cn].kind, NodeKind::Return { .. });
      self.expr(cn);
      if is_return {
        break;
      }
    }
    None
  }

  fn blockexpr(&mut self, n: NodeId) -> Option<ValId> {
    let loc = self.ast[n].loc;

    let prevb = self.end_block();
    self.f[prevb].kind = BlockKind::Goto;

    let b = self.mkblock(BlockKind::Goto, loc);
    let contb = self.mkblock(BlockKind::Goto, loc);

    self.f[prevb].succs[0] = Some(b);
    self.f[b].preds[0] = Some(prevb);
    self.f[b].succs[0] = Some(contb);
    self.f[contb].preds[0] = Some(b);

    self.start_block(b);
    self.seal_block(b);

    self.owners_enter_scope(n);

    let v = self.blockexpr0(n, false);

    self.end_block();
    self.start_block(contb);
    self.seal_block(contb);

    self.owners_unwind_scope(None);
    self.owners_leave_scope();

    v
  }

  /// A binary conditional is either a boolean or an optional check.
  fn bincond(&mut self, n: NodeId) -> ValId {
    let v = self.load_expr(n);
    if self.f[v].ty == Ty::BOOL {
      return v;
    }
    debug_assert!(self.comp.types.is_opt(self.f[v].ty));
    let b = self.b();
    let optcheck = self.pushval(b, Op::OCheck, self.ast[n].loc, Ty::BOOL);
    self.pusharg(optcheck, v);
    optcheck
  }

  fn ifexpr(&mut self, n: NodeId) -> Option<ValId> {
    // if..end:                  if..else..end:
    //   if cond b1 b2             if cond b1 b2
    //   b1: <then> ; goto b2      b1: <then> ; goto b3
    //   b2: <continuation>        b2: <else> ; goto b3
    //                             b3: <continuation>
    let NodeKind::If { cond, thenb, elseb } = self.ast[n].kind.clone() else {
      unreachable!();
    };
    let loc = self.ast[n].loc;
    let isrvalue = self.ast[n].flags.contains(NodeFlags::RVALUE);
    self.condnest += 1;

    let control = self.bincond(cond);

    // end predecessor block (leading up to and including "if")
    let ifb = self.end_block();
    self.f[ifb].kind = BlockKind::Switch;
    self.set_control(ifb, Some(control));

    let then_loc = self.ast[thenb].loc;
    let else_loc = elseb.map_or(loc, |e| self.ast[e].loc);
    let thenb_id = self.mkblock(BlockKind::Goto, then_loc);
    let elseb_id = self.mkblock(BlockKind::Goto, else_loc);
    self.f[ifb].succs[1] = Some(thenb_id);
    self.f[ifb].succs[0] = Some(elseb_id); // switch control -> [else, then]
    self.block_comment(thenb_id, format!("b{}.then", ifb.into_usize()));

    // snapshot the deadset before entering "then", in case it returns
    let entry_deadset = self.deadset.clone();

    // "then" branch
    self.f[thenb_id].preds[0] = Some(ifb);
    self.start_block(thenb_id);
    self.seal_block(thenb_id);
    self.owners_enter_scope(thenb);
    let mut thenv = self.blockexpr0(thenb, false);
    self.owners_unwind_scope(Some(&entry_deadset));
    self.owners_leave_scope();
    let thenb_nvars = self.vars.len();

    // if "then" returns, undo its deadset changes; if there's an "else",
    // it needs the deadset state from before "then"
    let mut then_entry_deadset = BitSet::new();
    let then_returns = self.f[self.b()].kind == BlockKind::Ret;
    if then_returns || elseb.is_some() {
      if elseb.is_some() {
        then_entry_deadset = self.deadset.clone();
      }
      self.deadset = entry_deadset.clone();
    }

    let thenb_id = self.end_block();

    let elsev;
    if let Some(elseb_node) = elseb {
      // "else" branch
      self.block_comment(elseb_id, format!("b{}.else", ifb.into_usize()));
      self.f[elseb_id].preds[0] = Some(ifb);
      self.start_block(elseb_id);
      self.seal_block(elseb_id);
      self.owners_enter_scope(elseb_node);
      elsev = if matches!(self.ast[elseb_node].kind, NodeKind::Block { .. }) {
        self.blockexpr0(elseb_node, false)
      } else {
        // "else if": a nested if expression
        self.expr(elseb_node)
      };
      self.owners_unwind_scope(Some(&entry_deadset));
      self.owners_leave_scope();

      // when "then" returns there is no continuation block, e.g.
      // "fun f() int { if true { 1 } else { return 2 }; 3 }"
      if self.f[thenb_id].kind == BlockKind::Ret {
        self.condnest -= 1;
        return elsev;
      }

      // drops in "else" for owners lost in "then"
      // (in the if-parent scope, not in a branch's scope)
      let exit = self.deadset.clone();
      self.owners_drop_lost(&exit, &then_entry_deadset, loc);

      let elseb_nvars = self.vars.len();
      let elseb_id = self.end_block();

      if self.f[elseb_id].kind == BlockKind::Ret {
        // undo deadset changes made by "else"
        self.deadset = then_entry_deadset.clone();
      } else if self.owners_find_lost(&then_entry_deadset, &self.deadset.clone()) {
        // drops in "then" for owners lost in "else"
        let exit = self.deadset.clone();
        self.start_block(thenb_id);
        self.owners_drop_lost(&then_entry_deadset, &exit, loc);
        self.end_block();
      }

      // merge "then" ownership losses into "after if"
      self.deadset.union_with(&then_entry_deadset);

      // continuation block
      let contb = self.mkblock(BlockKind::Goto, loc);
      self.block_comment(contb, format!("b{}.cont", ifb.into_usize()));

      let thenb_isnoop = self.f[thenb_id].values.is_empty()
        && thenb_nvars == 0
        && self.f[thenb_id].preds[0] == Some(ifb);
      let elseb_isnoop = self.f[elseb_id].values.is_empty()
        && elseb_nvars == 0
        && self.f[elseb_id].preds[0] == Some(ifb);

      if thenb_isnoop && elseb_isnoop {
        // neither branch has any effect; cut both out.
        // The continuation block must stay because var_read_recursive
        // searches predecessors for variables stashed by end_block.
        self.f[ifb].kind = BlockKind::Goto;
        self.set_control(ifb, None);
        self.f[ifb].succs = [Some(contb), None];
        self.f[contb].preds[0] = Some(ifb);
        self.discard_block(elseb_id);
        self.discard_block(thenb_id);
        thenv = elsev; // prime for the conditional below
      } else if thenb_isnoop {
        // "then" has no effect; cut it out
        self.f[elseb_id].succs[0] = Some(contb); // else —> cont
        self.f[ifb].succs[1] = Some(contb);      // if true —> cont
        self.f[contb].preds[0] = Some(elseb_id);
        self.f[contb].preds[1] = Some(ifb);
        self.discard_block(thenb_id);
      } else if elseb_isnoop {
        // "else" has no effect; cut it out
        self.f[thenb_id].succs[0] = Some(contb); // then —> cont
        self.f[ifb].succs[0] = Some(contb);      // if false —> cont
        self.f[contb].preds[0] = Some(ifb);
        self.f[contb].preds[1] = Some(thenb_id);
        self.discard_block(elseb_id);
      } else {
        // both branches have effect
        self.f[elseb_id].succs[0] = Some(contb);
        self.f[thenb_id].succs[0] = Some(contb);
        if self.f[thenb_id].kind == BlockKind::Ret {
          self.f[contb].preds[0] = Some(elseb_id);
        } else if self.f[elseb_id].kind == BlockKind::Ret {
          self.f[contb].preds[0] = Some(thenb_id);
        } else {
          self.f[contb].preds[1] = Some(thenb_id);
          self.f[contb].preds[0] = Some(elseb_id);
        }
      }

      self.start_block(contb);
      self.seal_block(contb);

      self.condnest -= 1;
      if !isrvalue || thenv == elsev {
        return thenv.or(elsev);
      }
      let (Some(tv), Some(ev)) = (thenv, elsev) else { return thenv.or(elsev) };
      debug_assert!(self.f[contb].preds[0].is_some(), "phi in block without preds");
      let b = self.b();
      let phi = self.pushval(b, Op::Phi, loc, self.f[tv].ty);
      self.pusharg(phi, tv);
      self.pusharg(phi, ev);
      self.comment(phi, "if");
      Some(phi)
    } else {
      // no "else" branch
      let lost = self.owners_find_lost(&entry_deadset, &self.deadset.clone());
      if self.f[thenb_id].kind != BlockKind::Ret && lost {
        // synthesize an "else" that drops what "then" gave up
        self.block_comment(elseb_id, format!("b{}.implicit_else", ifb.into_usize()));
        self.f[elseb_id].preds[0] = Some(ifb);
        self.start_block(elseb_id);
        self.seal_block(elseb_id);

        let exit = self.deadset.clone();
        self.owners_drop_lost(&entry_deadset, &exit, loc);

        let elseb_id = self.end_block();

        let contb = self.mkblock(BlockKind::Goto, loc);
        self.block_comment(contb, format!("b{}.cont", ifb.into_usize()));

        self.f[elseb_id].succs[0] = Some(contb);
        self.f[thenb_id].succs[0] = Some(contb);
        self.f[contb].preds[1] = Some(thenb_id);
        self.f[contb].preds[0] = Some(elseb_id);

        self.start_block(contb);
        self.seal_block(contb);
      } else {
        // convert the "else" block into the continuation
        self.block_comment(elseb_id, format!("b{}.cont", ifb.into_usize()));
        self.f[thenb_id].succs[0] = Some(elseb_id);
        self.f[elseb_id].preds[0] = Some(ifb);
        if self.f[thenb_id].kind != BlockKind::Ret {
          self.f[elseb_id].preds[1] = Some(thenb_id);
        }
        self.start_block(elseb_id);
        self.seal_block(elseb_id);

        // move the continuation last (blocks may have been created by "then")
        if let Some(p) = self.f.order.iter().position(|&x| x == elseb_id) {
          self.f.order.remove(p);
          self.f.order.push(elseb_id);
        }
      }

      self.condnest -= 1;
      if isrvalue {
        let b = self.b();
        let ty = thenv.map_or(self.ast[n].ty, |tv| self.f[tv].ty);
        let zero = self.pushval(b, Op::Zero, loc, ty);
        match thenv {
          Some(tv) if tv != zero => {
            let b = self.b();
            let phi = self.pushval(b, Op::Phi, loc, ty);
            self.pusharg(phi, tv);
            self.pusharg(phi, zero);
            self.comment(phi, "if");
            Some(phi)
          }
          _ => Some(zero),
        }
      } else {
        thenv
      }
    }
  }

  fn binop(&mut self, n: NodeId) -> ValId {
    let NodeKind::Binop { op, left, right } = self.ast[n].kind.clone() else {
      unreachable!();
    };
    let (loc, ty) = (self.ast[n].loc, self.ast[n].ty);
    let lv = self.load_expr(left);
    let rv = self.load_expr(right);
    let b = self.b();
    let v = self.pushval(b, op, loc, ty);
    self.pusharg(v, lv);
    self.pusharg(v, rv);
    v
  }

  fn unop(&mut self, n: NodeId) -> ValId {
    let (op, expr) = match self.ast[n].kind.clone() {
      NodeKind::PrefixOp { op, expr } | NodeKind::PostfixOp { op, expr } => (op, expr),
      _ => unreachable!(),
    };
    let (loc, ty) = (self.ast[n].loc, self.ast[n].ty);
    match op {
      Op::Deref => {
        let src = self.load_expr(expr);
        let b = self.b();
        let v = self.pushval(b, Op::Deref, loc, ty);
        self.pusharg(v, src);
        v
      }
      Op::Not | Op::Neg | Op::BitNot | Op::Borrow => {
        let src = self.load_expr(expr);
        let b = self.b();
        let v = self.pushval(b, op, loc, ty);
        self.pusharg(v, src);
        v
      }
      _ => {
        // ++/-- lowering is still incomplete
        let b = self.b();
        let v = self.pushval(b, Op::Noop, loc, ty);
        self.comment(v, "TODO");
        self.seterr(ErrorKind::Canceled);
        v
      }
    }
  }

  fn strlit(&mut self, n: NodeId) -> ValId {
    let NodeKind::StrLit { bytes } = self.ast[n].kind.clone() else { unreachable!() };
    let (loc, ty) = (self.ast[n].loc, self.ast[n].ty);
    let b = self.b();
    let v = self.pushval(b, Op::Str, loc, ty);
    self.f[v].aux = Aux::Bytes(bytes);
    v
  }

  fn arraylit(&mut self, n: NodeId) -> ValId {
    let NodeKind::ArrayLit { values, .. } = self.ast[n].kind.clone() else {
      unreachable!();
    };
    let (loc, ty) = (self.ast[n].loc, self.ast[n].ty);
    let b = self.b();
    let v = self.pushval(b, Op::Array, loc, ty);
    for &cn in &values {
      let mut vv = self.load_expr(cn);
      if self.f[vv].op != Op::Move {
        vv = self.move_or_copy(vv, self.ast[cn].loc, None);
      }
      self.pusharg(v, vv);
    }
    self.comment(v, "arraylit");
    v
  }

  fn load_local(&mut self, origin: NodeId, n: NodeId) -> ValId {
    let NodeKind::Local { name, .. } = self.ast[n].kind else { unreachable!() };
    let (ty, loc) = (self.ast[n].ty, self.ast[n].loc);
    let v = self.var_read(name, ty, loc);
    if !self.is_owner(ty) || !self.deadset.contains(v.into_usize()) {
      return v;
    }

    // owner without ownership of a value
    let namestr = self.comp.syms.name(name);
    let parent = self.find_arg_parent(v);

    if parent.is_none() && self.f[v].op == Op::Zero {
      self.error_at(self.ast[origin].loc,
        format!("use of uninitialized variable {namestr}"));
      if self.f[v].loc.is_known() {
        self.help_at(self.f[v].loc, format!("{namestr} defined here"));
      }
      return v;
    }

    self.error_at(self.ast[origin].loc, format!("use of dead value {namestr}"));
    if let Some(p) = parent {
      if self.f[p].op == Op::Move && self.f[p].loc.is_known() {
        self.help_at(self.f[p].loc, format!("{namestr} moved here"));
      }
    }
    v
  }

  /// The latest value that has `arg` as an argument. Diagnostics only.
  fn find_arg_parent(&self, arg: ValId) -> Option<ValId> {
    for &b in self.f.order.iter().rev() {
      for &v in self.f[b].values.iter().rev() {
        if self.f[v].args.contains(&arg) {
          return Some(v);
        }
      }
    }
    None
  }

  fn load_rvalue(&mut self, origin: NodeId, n: NodeId) -> ValId {
    match self.ast[n].kind.clone() {
      NodeKind::Id { target: Some(t), .. } => self.load_rvalue(origin, t),
      NodeKind::Local { .. } => self.load_local(origin, n),
      _ => self.expr(n).unwrap_or_else(|| {
        let b = self.b();
        self.pushval(b, Op::Noop, self.ast[n].loc, Ty::VOID)
      }),
    }
  }

  fn load_expr(&mut self, n: NodeId) -> ValId {
    if let NodeKind::Id { target: Some(t), .. } = self.ast[n].kind {
      return self.load_rvalue(n, t);
    }
    self.expr(n).unwrap_or_else(|| {
      let b = self.b();
      self.pushval(b, Op::Noop, self.ast[n].loc, Ty::VOID)
    })
  }

  fn expr(&mut self, n: NodeId) -> Option<ValId> {
    match self.ast[n].kind.clone() {
      NodeKind::Assign { .. } => Some(self.assign(n)),
      NodeKind::Binop { .. } => Some(self.binop(n)),
      NodeKind::Block { .. } => self.blockexpr(n),
      NodeKind::Call { .. } => Some(self.call(n)),
      NodeKind::TypeCons { .. } => Some(self.typecons(n)),
      NodeKind::Deref { .. } | NodeKind::PrefixOp { .. } | NodeKind::PostfixOp { .. } =>
        Some(self.unop(n)),
      NodeKind::Id { .. } => Some(self.idexpr(n)),
      NodeKind::Fun { .. } => Some(self.funexpr(n)),
      NodeKind::If { .. } => self.ifexpr(n),
      NodeKind::Return { .. } => self.retexpr(n),
      NodeKind::Member { .. } => Some(self.member(n)),

      NodeKind::BoolLit { val } => {
        let (ty, loc) = (self.ast[n].ty, self.ast[n].loc);
        Some(self.intconst(ty, u64::from(val), loc))
      }
      NodeKind::IntLit { val } => {
        let (ty, loc) = (self.ast[n].ty, self.ast[n].loc);
        Some(self.intconst(ty, val, loc))
      }
      NodeKind::FloatLit { val } => {
        let (ty, loc) = (self.ast[n].ty, self.ast[n].loc);
        Some(self.floatconst(ty, val, loc))
      }
      NodeKind::StrLit { .. } => Some(self.strlit(n)),
      NodeKind::ArrayLit { .. } => Some(self.arraylit(n)),

      NodeKind::Local { lkind: LocalKind::Var | LocalKind::Let, .. } =>
        Some(self.vardef(n)),
      NodeKind::Local { lkind: LocalKind::Param, .. } => {
        let NodeKind::Local { name, .. } = self.ast[n].kind else { unreachable!() };
        let (ty, loc) = (self.ast[n].ty, self.ast[n].loc);
        Some(self.var_read(name, ty, loc))
      }

      NodeKind::Subscript { .. } => {
        let NodeKind::Subscript { recv, index, .. } = self.ast[n].kind.clone() else {
          unreachable!();
        };
        let (loc, ty) = (self.ast[n].loc, self.ast[n].ty);
        let rv = self.load_expr(recv);
        let iv = self.load_expr(index);
        let b = self.b();
        let v = self.pushval(b, Op::Gep, loc, ty);
        self.pusharg(v, rv);
        self.pusharg(v, iv);
        Some(v)
      }

      // loop lowering is still incomplete
      NodeKind::For { .. } => {
        let b = self.b();
        let v = self.pushval(b, Op::Noop, self.ast[n].loc, Ty::VOID);
        self.comment(v, "TODO");
        self.seterr(ErrorKind::Canceled);
        Some(v)
      }

      // a bare namespace reference has no runtime value
      NodeKind::Ns { .. } => {
        let b = self.b();
        let v = self.pushval(b, Op::Noop, self.ast[n].loc, Ty::VOID);
        self.comment(v, "ns");
        Some(v)
      }

      k => unreachable!("unexpected node in IR build: {k:?}"),
    }
  }

  //——————————————————————————————————————————————————————————————————————
  // functions & units

  fn addfun(&mut self, n: NodeId) -> (usize, bool) {
    // functions may refer to themselves: record in-progress functions
    if let Some(&idx) = self.funm.get(&n) {
      return (idx, false);
    }
    let name = match self.ast[n].kind.clone() {
      NodeKind::Fun { name: Some(name), .. } => self.comp.syms.name(name).to_string(),
      _ => String::new(),
    };
    let idx = self.unit.funs.len();
    self.unit.funs.push(IrFun { name, ty: self.ast[n].ty, ..IrFun::default() });
    self.funm.insert(n, idx);

    let has_body = matches!(self.ast[n].kind, NodeKind::Fun { body: Some(_), .. });
    if !has_body {
      return (idx, false); // just a declaration
    }
    if self.building {
      // nested function definition or reference: build it later
      self.funqueue.push(n);
      return (idx, false);
    }
    (idx, true)
  }

  fn fun(&mut self, n: NodeId) -> usize {
    let (idx, build_now) = self.addfun(n);
    if build_now {
      self.build_fun(n, idx);
    }
    idx
  }

  fn funexpr(&mut self, n: NodeId) -> ValId {
    let idx = self.fun(n);
    let b = self.b();
    let (loc, ty) = (self.ast[n].loc, self.ast[n].ty);
    let v = self.pushval(b, Op::Fun, loc, ty);
    self.f[v].aux = Aux::FunIdx(idx as u32);
    let name = self.unit.funs[idx].name.clone();
    if !name.is_empty() {
      self.comment(v, name);
    }
    v
  }

  fn build_fun(&mut self, n: NodeId, idx: usize) {
    let NodeKind::Fun { params, body: Some(body), .. } = self.ast[n].kind.clone() else {
      unreachable!();
    };
    let loc = self.ast[n].loc;

    std::mem::swap(&mut self.f, &mut self.unit.funs[idx]);
    self.building = true;
    self.condnest = 0;
    self.owners.clear();
    self.owners_base = 0;
    self.deadset.clear();

    let entryb = self.mkblock(BlockKind::Goto, loc);
    self.start_block(entryb);
    self.seal_block(entryb); // the entry block has no predecessors

    self.owners_enter_scope(body);

    // define arguments
    for (i, &p) in params.iter().enumerate() {
      let NodeKind::Local { name, .. } = self.ast[p].kind else { continue };
      if name == Symbol::UNDER {
        continue;
      }
      let (pty, ploc) = (self.ast[p].ty, self.ast[p].loc);
      let b = self.b();
      let v = self.pushval(b, Op::Arg, ploc, pty);
      self.f[v].aux = Aux::I64(i as u64);
      self.f[v].var.dst = Some(name);
      let namestr = self.comp.syms.name(name).to_string();
      self.comment(v, namestr);
      if self.is_owner(pty) {
        self.owners_add(v);
      }
      self.var_write(name, v);
    }

    // implicit return value: the body is an rvalue when the result type is
    // not void and the last expression is not an explicit return
    let Type::Fun { result, .. } =
      self.comp.types.data(self.comp.types.unwrap_alias(self.ast[n].ty))
    else { unreachable!() };
    let mut set_rvalue = false;
    if result != Ty::VOID {
      if let NodeKind::Block { children, .. } = &self.ast[body].kind {
        if let Some(&last) = children.last() {
          if !matches!(self.ast[last].kind, NodeKind::Return { .. }) {
            self.ast[body].flags |= NodeFlags::RVALUE;
            set_rvalue = true;
          }
        }
      }
    }

    let entry_deadset = self.deadset.clone();

    let bodyv = self.blockexpr0(body, true);

    if set_rvalue {
      self.ast[body].flags &= !NodeFlags::RVALUE;
    }

    // implicit return; an explicit "return" already set the block kind
    if self.f[self.b()].kind != BlockKind::Ret {
      let body_loc = self.ast[body].loc;
      self.ret(bodyv, body_loc);
    }

    self.owners_unwind_scope(Some(&entry_deadset));
    self.owners_leave_scope();

    self.end_block();

    // reset per-function SSA state
    self.vars.clear();
    self.defvars.clear();
    self.pendingphis.clear();

    std::mem::swap(&mut self.f, &mut self.unit.funs[idx]);
    self.building = false;
  }

  fn build_unit(&mut self, children: &[NodeId]) {
    for &cn in children {
      if !self.comp.ok() {
        break;
      }
      match self.ast[cn].kind {
        NodeKind::Typedef { .. } | NodeKind::Import { .. } => {}
        NodeKind::Fun { .. } => { self.fun(cn); }
        _ => {}
      }

      // flush the queue of functions discovered while building
      while let Some(fnode) = self.funqueue.pop() {
        let idx = self.funm[&fnode];
        self.build_fun(fnode, idx);
      }
    }
  }
}
