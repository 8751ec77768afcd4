//! The type checker.
//!
//! Runs over a package's units in three passes:
//!
//! 1. *declare*: package-level names (typedefs, functions) are entered into
//!    `Pkg.defs`, with duplicate definitions reported against the previous
//!    definition site;
//! 2. *interfaces*: typedef bodies are resolved and interned, function
//!    signatures are resolved, and type functions are registered in the
//!    package's type-function table;
//! 3. *bodies*: every expression is annotated with a concrete type.
//!
//! Optionals narrow inside `if` branches, visibility upgrades propagate to
//! types reachable from public signatures, and diagnostics carry
//! "defined here" notes for duplicate definitions and call mismatches.

use std::sync::Arc;
use hashbrown::HashMap;
use smallvec::SmallVec;
use crate::{Compiler, ErrorKind};
use crate::diag::DiagKind;
use crate::loc::{Loc, Origin};
use crate::pkg::{Def, DefEnt, Pkg};
use crate::scope::Scope;
use crate::symbol::Symbol;
use crate::types::{Field, FunParam, Op, Ty, TypeFlags, TypeFun, Type};
use crate::types::ast::{Ast, LocalKind, Node, NodeFlags, NodeId, NodeKind, Unit, Vis};

/// What a unit-local imported name refers to.
#[derive(Clone)]
enum Imported {
  /// Whole-package import bound to a name: `import "p" as x`.
  PkgNs(Arc<Pkg>),
  /// Selected member: `import (y as x) from "p"` binds x to p's y.
  Sel(Arc<Pkg>, Symbol),
}

pub struct Checker<'c> {
  comp: &'c Compiler,
  pkg: &'c Arc<Pkg>,
  unit_idx: u32,
  scope: Scope,
  imports: HashMap<Symbol, Imported>,
  tplparams: HashMap<Symbol, Ty>,
  result_ty: Ty,
  /// Named types referenced from public signatures, for visibility upgrade.
  pub_reachable: Vec<Symbol>,
}

/// Typecheck all units of a package.
pub fn typecheck_pkg(
  comp: &Compiler,
  pkg: &Arc<Pkg>,
  units: &mut [Unit],
) -> Result<(), ErrorKind> {
  // pass 1: declare package-level names
  for (ui, unit) in units.iter_mut().enumerate() {
    declare_toplevel(comp, pkg, ui as u32, unit);
  }

  // pass 2: interfaces
  let mut pub_reachable = Vec::new();
  for (ui, unit) in units.iter_mut().enumerate() {
    let mut cx = Checker::new(comp, pkg, ui as u32);
    cx.check_interfaces(unit);
    pub_reachable.append(&mut cx.pub_reachable);
  }

  // visibility upgrade: types reachable from public signatures become public
  for name in pub_reachable {
    if let Some(mut ent) = pkg.def_get(name) {
      if ent.vis < Vis::Pub {
        ent.vis = Vis::Pub;
        pkg.def_set(name, ent);
        let unit = &mut units[ent.def.unit as usize];
        unit.ast[ent.def.node].flags.upgrade_vis(Vis::Pub);
      }
    }
  }

  // pass 3: bodies
  for (ui, unit) in units.iter_mut().enumerate() {
    if !comp.ok() {
      break;
    }
    let mut cx = Checker::new(comp, pkg, ui as u32);
    cx.check_unit(unit);
  }

  if comp.ok() { Ok(()) } else { Err(ErrorKind::Invalid) }
}

fn declare_toplevel(comp: &Compiler, pkg: &Arc<Pkg>, ui: u32, unit: &mut Unit) {
  for &child in &unit.children {
    let (name, nameloc, is_type) = match &unit.ast[child].kind {
      NodeKind::Typedef { name, nameloc, .. } => (*name, *nameloc, true),
      NodeKind::Fun { name: Some(name), nameloc, params, .. } => {
        // type functions are namespaced by their receiver type
        let is_typefun = params.first().is_some_and(|&p| {
          matches!(unit.ast[p].kind, NodeKind::Local { isthis: true, .. })
        });
        if is_typefun {
          continue;
        }
        (*name, *nameloc, false)
      }
      _ => continue,
    };

    let vis = unit.ast[child].flags.vis();
    let ty = if is_type {
      comp.types.declare_named(name, nameloc)
    } else {
      Ty::UNKNOWN
    };
    let ent = DefEnt { def: Def { unit: ui, node: child }, ty, loc: nameloc, vis };
    if let Err(existing) = pkg.def_add(name, ent) {
      let origin = Origin::of_loc(&comp.locmap, nameloc);
      comp.diag.report(origin, DiagKind::Error,
        format!("duplicate definition \"{}\"", comp.syms.name(name)));
      let origin = Origin::of_loc(&comp.locmap, existing.loc);
      comp.diag.report(origin, DiagKind::Help,
        format!("\"{}\" defined here", comp.syms.name(name)));
    }
  }
}

impl<'c> Checker<'c> {
  #[must_use] pub fn new(comp: &'c Compiler, pkg: &'c Arc<Pkg>, unit_idx: u32) -> Checker<'c> {
    Checker {
      comp,
      pkg,
      unit_idx,
      scope: Scope::new(),
      imports: HashMap::new(),
      tplparams: HashMap::new(),
      result_ty: Ty::VOID,
      pub_reachable: Vec::new(),
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

  fn fmt_ty(&self, t: Ty) -> String {
    self.comp.types.fmt(&self.comp.syms, t)
  }

  fn name(&self, s: Symbol) -> Arc<str> {
    self.comp.syms.name(s)
  }

  //——————————————————————————————————————————————————————————————————————
  // pass 2: interfaces

  fn collect_imports(&mut self, unit: &Unit) {
    let imports: Vec<NodeId> = unit.imports().collect();
    for id in imports {
      let NodeKind::Import { name, ids, pkg, .. } = &unit.ast[id].kind else {
        unreachable!();
      };
      let Some(dep) = pkg.clone() else { continue }; // unresolved; reported earlier
      if *name != Symbol::UNDER {
        self.imports.insert(*name, Imported::PkgNs(dep.clone()));
      }
      for sel in ids {
        let orig = sel.origname.unwrap_or(sel.name);
        self.imports.insert(sel.name, Imported::Sel(dep.clone(), orig));
      }
    }
  }

  pub fn check_interfaces(&mut self, unit: &mut Unit) {
    self.collect_imports(unit);
    let children = unit.children.clone();
    for child in children {
      match unit.ast[child].kind.clone() {
        NodeKind::Typedef { name, nameloc, texpr, tplparams } => {
          let t = self.comp.types.declare_named(name, nameloc);
          for &p in &tplparams {
            let ph = self.comp.types.intern(Type::Placeholder { name: p });
            self.tplparams.insert(p, ph);
          }
          let body = self.resolve_texpr(&mut unit.ast, texpr);
          let data = if tplparams.is_empty() {
            match self.comp.types.data(body) {
              // "type A { ... }": a named struct
              Type::Struct { name: None, fields } =>
                Type::Struct { name: Some(name), fields },
              // "type A B": a named alias
              _ => Type::Alias { name, elem: body },
            }
          } else {
            let params = tplparams.iter().copied().collect();
            for p in &tplparams {
              self.tplparams.remove(p);
            }
            Type::Template { name, params, body }
          };
          self.comp.types.define_named(t, data);
          unit.ast[child].ty = t;
          unit.ast[child].flags |= NodeFlags::CHECKED;
          // update the recorded def type
          if let Some(mut ent) = self.pkg.def_get(name) {
            if ent.def.unit == self.unit_idx && ent.def.node == child {
              ent.ty = t;
              self.pkg.def_set(name, ent);
            }
          }
        }
        NodeKind::Fun { name, params, result, .. } => {
          let ft = self.resolve_fun_signature(&mut unit.ast, child, &params, result);
          unit.ast[child].ty = ft;
          let is_pub = unit.ast[child].flags.vis() == Vis::Pub;
          if is_pub {
            self.collect_pub_types(&unit.ast, &params, result);
          }

          // type function?
          let recvt = params.first().and_then(|&p| {
            match unit.ast[p].kind {
              NodeKind::Local { isthis: true, .. } => Some(unit.ast[p].ty),
              _ => None,
            }
          });
          let def = Def { unit: self.unit_idx, node: child };
          if let Some(recvt) = recvt {
            if let NodeKind::Fun { recvt: slot, .. } = &mut unit.ast[child].kind {
              *slot = recvt;
            }
            if let Some(name) = name {
              let recv = self.comp.types.unwrap_ptr(recvt);
              self.pkg.tfundefs.add(recv, name, TypeFun { def, ty: ft });
              if name == Symbol::DROP {
                self.comp.types.add_flags(recv, TypeFlags::DROP);
              }
            }
          } else if let Some(name) = name {
            if let Some(mut ent) = self.pkg.def_get(name) {
              if ent.def == def {
                ent.ty = ft;
                self.pkg.def_set(name, ent);
              }
            }
            if name == Symbol::MAIN {
              *self.pkg.mainfun.lock().unwrap() = Some(def);
            }
          }
        }
        _ => {}
      }
    }
  }

  fn resolve_fun_signature(
    &mut self,
    ast: &mut Ast,
    _fun: NodeId,
    params: &[NodeId],
    result: Option<NodeId>,
  ) -> Ty {
    let mut fps: SmallVec<[FunParam; 4]> = SmallVec::new();
    for &p in params {
      let NodeKind::Local { name, texpr, isthis, ismut, .. } = ast[p].kind.clone() else {
        continue;
      };
      let ty = match texpr {
        Some(te) => self.resolve_texpr(ast, te),
        None => {
          self.error_at(ast[p].loc, "missing parameter type");
          Ty::UNKNOWN
        }
      };
      ast[p].ty = ty;
      ast[p].flags |= NodeFlags::CHECKED;
      fps.push(FunParam { name: Some(name), ty, isthis, ismut });
    }
    let result_ty = match result {
      Some(r) => self.resolve_texpr(ast, r),
      None => Ty::VOID,
    };
    self.comp.types.intern(Type::Fun { params: fps, result: result_ty })
  }

  fn collect_pub_types(&mut self, ast: &Ast, params: &[NodeId], result: Option<NodeId>) {
    fn walk(ast: &Ast, n: NodeId, out: &mut Vec<Symbol>) {
      match &ast[n].kind {
        NodeKind::TypeName { name, .. } => out.push(*name),
        NodeKind::TypePtr { elem } | NodeKind::TypeRef { elem, .. } |
        NodeKind::TypeSlice { elem, .. } | NodeKind::TypeOpt { elem } |
        NodeKind::TypeArray { elem, .. } => walk(ast, *elem, out),
        NodeKind::TypeFun { params, result } => {
          for &p in params { walk(ast, p, out) }
          if let Some(r) = result { walk(ast, *r, out) }
        }
        NodeKind::Local { texpr: Some(t), .. } => walk(ast, *t, out),
        _ => {}
      }
    }
    for &p in params {
      if let NodeKind::Local { texpr: Some(t), .. } = ast[p].kind {
        walk(ast, t, &mut self.pub_reachable);
      }
    }
    if let Some(r) = result {
      walk(ast, r, &mut self.pub_reachable);
    }
  }

  //——————————————————————————————————————————————————————————————————————
  // type expression resolution

  fn resolve_texpr(&mut self, ast: &mut Ast, n: NodeId) -> Ty {
    let loc = ast[n].loc;
    let t = match ast[n].kind.clone() {
      NodeKind::TypeName { resolved: Some(t), .. } => t,
      NodeKind::TypeName { name, .. } => {
        let t = self.resolve_type_name(name, loc);
        if let NodeKind::TypeName { resolved, .. } = &mut ast[n].kind {
          *resolved = Some(t);
        }
        t
      }
      NodeKind::TypePtr { elem } => {
        let e = self.resolve_texpr(ast, elem);
        self.comp.types.intern_at(Type::Ptr(e), loc)
      }
      NodeKind::TypeRef { elem, ismut } => {
        let e = self.resolve_texpr(ast, elem);
        let data = if ismut { Type::MutRef(e) } else { Type::Ref(e) };
        self.comp.types.intern_at(data, loc)
      }
      NodeKind::TypeSlice { elem, ismut, .. } => {
        let e = self.resolve_texpr(ast, elem);
        let data = if ismut { Type::MutSlice(e) } else { Type::Slice(e) };
        self.comp.types.intern_at(data, loc)
      }
      NodeKind::TypeOpt { elem } => {
        let e = self.resolve_texpr(ast, elem);
        self.comp.types.intern_at(Type::Optional(e), loc)
      }
      NodeKind::TypeArray { elem, len, .. } => {
        let e = self.resolve_texpr(ast, elem);
        let n_elems = match len {
          None => 0,
          Some(le) => match ast[le].kind {
            NodeKind::IntLit { val } => val,
            _ => {
              self.error_at(ast[le].loc, "array length must be a constant");
              0
            }
          },
        };
        self.comp.types.intern_at(Type::Array(e, n_elems), loc)
      }
      NodeKind::TypeFun { params, result } => {
        let mut fps: SmallVec<[FunParam; 4]> = SmallVec::new();
        for &p in &params {
          let ty = self.resolve_texpr(ast, p);
          fps.push(FunParam { name: None, ty, isthis: false, ismut: false });
        }
        let result_ty = match result {
          Some(r) => self.resolve_texpr(ast, r),
          None => Ty::VOID,
        };
        self.comp.types.intern_at(Type::Fun { params: fps, result: result_ty }, loc)
      }
      NodeKind::TypeStructBody { fields } => {
        let mut fs: SmallVec<[Field; 4]> = SmallVec::new();
        for &f in &fields {
          let NodeKind::Local { name, texpr, .. } = ast[f].kind.clone() else { continue };
          let ty = match texpr {
            Some(te) => self.resolve_texpr(ast, te),
            None => Ty::UNKNOWN,
          };
          ast[f].ty = ty;
          ast[f].flags |= NodeFlags::CHECKED;
          fs.push(Field { name, ty });
        }
        // field offsets for later GEP lowering
        let st = self.comp.types.intern_at(Type::Struct { name: None, fields: fs }, loc);
        let mut offset = 0u64;
        for &f in &fields {
          let fty = ast[f].ty;
          let align = u64::from(self.comp.types.align(fty).max(1));
          offset = offset.next_multiple_of(align);
          if let NodeKind::Local { offset: o, .. } = &mut ast[f].kind {
            *o = offset;
          }
          offset += self.comp.types.size(fty);
        }
        st
      }
      NodeKind::TypeInstance { recv, args, .. } => {
        let rt = self.resolve_texpr(ast, recv);
        let mut ats: SmallVec<[Ty; 2]> = SmallVec::new();
        for &a in &args {
          ats.push(self.resolve_texpr(ast, a));
        }
        self.instantiate(rt, &ats, loc)
      }
      _ => {
        self.error_at(loc, "expected a type");
        Ty::UNKNOWN
      }
    };
    ast[n].ty = t;
    ast[n].flags |= NodeFlags::CHECKED;
    t
  }

  fn resolve_type_name(&mut self, name: Symbol, loc: Loc) -> Ty {
    let namestr = self.name(name);
    if let Some(t) = self.comp.types.prim_by_name(&namestr) {
      return t;
    }
    if let Some(&t) = self.tplparams.get(&name) {
      return t;
    }
    if let Some(ent) = self.pkg.def_get(name) {
      if matches!(self.comp.types.data(ent.ty), Type::Fun { .. }) {
        self.error_at(loc, format!("\"{namestr}\" is not a type"));
        return Ty::UNKNOWN;
      }
      return ent.ty;
    }
    match self.imports.get(&name).cloned() {
      Some(Imported::Sel(dep, orig)) => {
        if let Some(ent) = dep.def_get(orig) {
          if ent.vis == Vis::Pub {
            return ent.ty;
          }
          self.error_at(loc, format!(
            "\"{}\" is private to package \"{}\"", self.name(orig), dep.path));
          return Ty::UNKNOWN;
        }
        self.error_at(loc, format!(
          "package \"{}\" has no member \"{}\"", dep.path, self.name(orig)));
        Ty::UNKNOWN
      }
      _ => {
        self.error_at(loc, format!("unknown type \"{namestr}\""));
        Ty::UNKNOWN
      }
    }
  }

  /// Instantiate a template with the given arguments by substituting its
  /// placeholders. Memoization falls out of structural interning: the same
  /// (template, args) always yields the same type, including when an
  /// argument is itself a template instance.
  fn instantiate(&mut self, recv: Ty, args: &[Ty], loc: Loc) -> Ty {
    let Type::Template { name, params, body } = self.comp.types.data(recv) else {
      self.error_at(loc, format!("{} is not a template", self.fmt_ty(recv)));
      return Ty::UNKNOWN;
    };
    if params.len() != args.len() {
      self.error_at(loc, format!(
        "wrong number of template arguments for {}; want {}, got {}",
        self.name(name), params.len(), args.len()));
      return Ty::UNKNOWN;
    }
    let map: HashMap<Symbol, Ty> =
      params.iter().copied().zip(args.iter().copied()).collect();
    let t = self.subst(body, &map);
    self.comp.types.add_flags(t, TypeFlags::TEMPLATEI);
    // record the instantiation itself for identity & memoization
    self.comp.types.intern_at(
      Type::Instance { recv, args: args.iter().copied().collect() }, loc);
    t
  }

  fn subst(&self, t: Ty, map: &HashMap<Symbol, Ty>) -> Ty {
    let ts = &self.comp.types;
    match ts.data(t) {
      Type::Placeholder { name } => map.get(&name).copied().unwrap_or(t),
      Type::Ptr(e) => ts.intern(Type::Ptr(self.subst(e, map))),
      Type::Ref(e) => ts.intern(Type::Ref(self.subst(e, map))),
      Type::MutRef(e) => ts.intern(Type::MutRef(self.subst(e, map))),
      Type::Slice(e) => ts.intern(Type::Slice(self.subst(e, map))),
      Type::MutSlice(e) => ts.intern(Type::MutSlice(self.subst(e, map))),
      Type::Optional(e) => ts.intern(Type::Optional(self.subst(e, map))),
      Type::Array(e, n) => ts.intern(Type::Array(self.subst(e, map), n)),
      Type::Struct { name: None, fields } => {
        let fields = fields.iter()
          .map(|f| Field { name: f.name, ty: self.subst(f.ty, map) })
          .collect();
        ts.intern(Type::Struct { name: None, fields })
      }
      Type::Fun { params, result } => {
        let params = params.iter()
          .map(|p| FunParam { ty: self.subst(p.ty, map), ..p.clone() })
          .collect();
        ts.intern(Type::Fun { params, result: self.subst(result, map) })
      }
      _ => t,
    }
  }

  //——————————————————————————————————————————————————————————————————————
  // pass 3: bodies

  pub fn check_unit(&mut self, unit: &mut Unit) {
    self.collect_imports(unit);
    self.scope.push();
    let children = unit.children.clone();
    for child in children {
      match unit.ast[child].kind.clone() {
        NodeKind::Fun { .. } => { self.check_fun(&mut unit.ast, child); }
        NodeKind::Local { .. } => { self.check_expr(&mut unit.ast, child); }
        NodeKind::Typedef { .. } | NodeKind::Import { .. } => {}
        _ => { self.check_expr(&mut unit.ast, child); }
      }
    }
    self.scope.pop();
  }

  fn check_fun(&mut self, ast: &mut Ast, n: NodeId) -> Ty {
    let NodeKind::Fun { params, body, .. } = ast[n].kind.clone() else {
      unreachable!();
    };
    let ft = ast[n].ty;
    if ft == Ty::UNKNOWN {
      // anonymous / nested function: resolve its signature now
      let NodeKind::Fun { params, result, .. } = ast[n].kind.clone() else { unreachable!() };
      let ft2 = self.resolve_fun_signature(ast, n, &params, result);
      ast[n].ty = ft2;
    }
    let ft = ast[n].ty;
    let Type::Fun { result, .. } = self.comp.types.data(ft) else {
      return Ty::UNKNOWN;
    };

    let Some(body) = body else {
      ast[n].flags |= NodeFlags::CHECKED;
      return ft; // prototype
    };

    let saved_result = std::mem::replace(&mut self.result_ty, result);
    self.scope.push();
    for &p in &params {
      if let NodeKind::Local { name, .. } = ast[p].kind {
        self.scope.define(name, p);
      }
    }

    // the last expression of the body is the implicit return value
    // when the result type is not void
    if result != Ty::VOID {
      if let NodeKind::Block { children, .. } = &ast[body].kind {
        if let Some(&last) = children.last() {
          if !matches!(ast[last].kind, NodeKind::Return { .. }) {
            ast[body].flags |= NodeFlags::RVALUE;
            self.mark_rvalue(ast, last);
          }
        }
      }
    }

    let bt = self.check_block(ast, body);
    if result != Ty::VOID
      && ast[body].flags.contains(NodeFlags::RVALUE)
      && !self.comp.types.is_compat(result, bt)
      && bt != Ty::UNKNOWN
    {
      self.error_at(ast[body].loc, format!(
        "incompatible result type {}, expecting {}",
        self.fmt_ty(bt), self.fmt_ty(result)));
    }

    self.scope.pop();
    self.result_ty = saved_result;
    ast[n].flags |= NodeFlags::CHECKED;
    ft
  }

  fn mark_rvalue(&self, ast: &mut Ast, n: NodeId) {
    ast[n].flags |= NodeFlags::RVALUE;
    match ast[n].kind.clone() {
      NodeKind::If { thenb, elseb, .. } => {
        self.mark_rvalue(ast, thenb);
        if let Some(e) = elseb {
          self.mark_rvalue(ast, e);
        }
      }
      NodeKind::Block { children, .. } => {
        if let Some(&last) = children.last() {
          self.mark_rvalue(ast, last);
        }
      }
      _ => {}
    }
  }

  fn check_block(&mut self, ast: &mut Ast, n: NodeId) -> Ty {
    let NodeKind::Block { children, .. } = ast[n].kind.clone() else {
      return self.check_expr(ast, n);
    };
    self.scope.push();
    let mut last_ty = Ty::VOID;
    let mut exits = false;
    for (i, &c) in children.iter().enumerate() {
      let t = self.check_expr(ast, c);
      if matches!(ast[c].kind, NodeKind::Return { .. }) {
        exits = true;
      }
      if i + 1 == children.len() {
        last_ty = t;
      }
    }
    self.scope.pop();
    if exits {
      ast[n].flags |= NodeFlags::EXIT;
    }
    let ty = if ast[n].flags.contains(NodeFlags::RVALUE) { last_ty } else { Ty::VOID };
    ast[n].ty = ty;
    ast[n].flags |= NodeFlags::CHECKED;
    ty
  }

  /// Retype an untyped-looking integer literal to `want` when the value
  /// fits. Keeps e.g. `var x u8 = 200` working without casts.
  fn coerce_intlit(&self, ast: &mut Ast, n: NodeId, want: Ty) {
    let NodeKind::IntLit { val } = ast[n].kind else { return };
    if ast[n].ty != Ty::INT || !self.comp.types.is_integer(want) {
      return;
    }
    let fits = match want {
      Ty::I8 => i8::try_from(val as i64).is_ok() && val <= i64::MAX as u64,
      Ty::I16 => i16::try_from(val as i64).is_ok() && val <= i64::MAX as u64,
      Ty::I32 | Ty::INT => i32::try_from(val as i64).is_ok() && val <= i64::MAX as u64,
      Ty::I64 => val <= i64::MAX as u64,
      Ty::U8 => u8::try_from(val).is_ok(),
      Ty::U16 => u16::try_from(val).is_ok(),
      Ty::U32 | Ty::UINT => u32::try_from(val).is_ok(),
      Ty::U64 => true,
      _ => false,
    };
    if fits {
      ast[n].ty = want;
    }
  }

  fn check_expr(&mut self, ast: &mut Ast, n: NodeId) -> Ty {
    let loc = ast[n].loc;
    let ty = match ast[n].kind.clone() {
      NodeKind::Bad | NodeKind::Comment { .. } => Ty::UNKNOWN,

      NodeKind::BoolLit { .. } => Ty::BOOL,
      NodeKind::IntLit { .. } | NodeKind::FloatLit { .. } => ast[n].ty,
      NodeKind::StrLit { .. } => self.comp.types.intern(Type::Slice(Ty::U8)),

      NodeKind::ArrayLit { values, .. } => {
        let mut elem = Ty::UNKNOWN;
        for (i, &v) in values.iter().enumerate() {
          let vt = self.check_expr(ast, v);
          if i == 0 {
            elem = vt;
          } else {
            self.coerce_intlit(ast, v, elem);
            let vt = ast[v].ty;
            if !self.comp.types.is_compat(elem, vt) {
              self.error_at(ast[v].loc, format!(
                "mixed array element types {} and {}",
                self.fmt_ty(elem), self.fmt_ty(vt)));
            }
          }
        }
        self.comp.types.intern(Type::Array(elem, values.len() as u64))
      }

      NodeKind::Id { name, target } => self.check_id(ast, n, name, target, loc),

      NodeKind::Ns { .. } => ast[n].ty,

      NodeKind::Local { lkind, name, nameloc, texpr, init, .. } => {
        let declared = texpr.map(|te| self.resolve_texpr(ast, te));
        let initty = init.map(|i| {
          let t = self.check_expr(ast, i);
          ast[i].flags |= NodeFlags::RVALUE;
          t
        });
        let ty = match (declared, initty) {
          (Some(d), Some(it)) => {
            if let Some(i) = init {
              self.coerce_intlit(ast, i, d);
            }
            let it = init.map_or(it, |i| ast[i].ty);
            if !self.comp.types.is_compat(d, it) && it != Ty::UNKNOWN {
              self.error_at(nameloc, format!(
                "cannot initialize {} of type {} with value of type {}",
                self.name(name), self.fmt_ty(d), self.fmt_ty(it)));
            }
            d
          }
          (Some(d), None) => d,
          (None, Some(it)) => it,
          (None, None) => Ty::UNKNOWN,
        };
        if matches!(lkind, LocalKind::Var | LocalKind::Let) {
          self.scope.define(name, n);
        }
        ty
      }

      NodeKind::Member { recv, name, .. } => self.check_member(ast, n, recv, name, loc),

      NodeKind::Call { recv, args, .. } => self.check_call(ast, n, recv, &args, loc),

      NodeKind::TypeCons { texpr, args } => {
        let t = self.resolve_texpr(ast, texpr);
        for &a in &args {
          self.check_expr(ast, a);
        }
        t
      }

      NodeKind::Assign { left, right, .. } => {
        let lt = self.check_lvalue(ast, left);
        let rt = self.check_expr(ast, right);
        ast[right].flags |= NodeFlags::RVALUE;
        self.coerce_intlit(ast, right, lt);
        let rt = if matches!(ast[right].kind, NodeKind::IntLit { .. }) {
          ast[right].ty
        } else {
          rt
        };
        if !self.comp.types.is_compat(lt, rt) && lt != Ty::UNKNOWN && rt != Ty::UNKNOWN {
          self.error_at(loc, format!(
            "cannot assign value of type {} to {}",
            self.fmt_ty(rt), self.fmt_ty(lt)));
        }
        lt
      }

      NodeKind::Binop { op, left, right } => {
        let lt = self.check_expr(ast, left);
        let rt = self.check_expr(ast, right);
        ast[left].flags |= NodeFlags::RVALUE;
        ast[right].flags |= NodeFlags::RVALUE;
        self.coerce_intlit(ast, left, rt);
        self.coerce_intlit(ast, right, lt);
        let lt = ast[left].ty;
        let rt = ast[right].ty;
        match op {
          Op::LAnd | Op::LOr => {
            for (side, st) in [(left, lt), (right, rt)] {
              if st != Ty::BOOL && st != Ty::UNKNOWN {
                self.error_at(ast[side].loc, format!(
                  "expected boolean operand, got {}", self.fmt_ty(st)));
              }
            }
            Ty::BOOL
          }
          op if op.is_cmp() => {
            if !self.comp.types.is_compat(lt, rt) && !self.comp.types.is_compat(rt, lt)
              && lt != Ty::UNKNOWN && rt != Ty::UNKNOWN
            {
              self.error_at(loc, format!(
                "invalid comparison of {} and {}", self.fmt_ty(lt), self.fmt_ty(rt)));
            }
            Ty::BOOL
          }
          _ => {
            if !self.comp.types.is_compat(lt, rt) && !self.comp.types.is_compat(rt, lt)
              && lt != Ty::UNKNOWN && rt != Ty::UNKNOWN
            {
              self.error_at(loc, format!(
                "invalid operation: mismatched types {} and {}",
                self.fmt_ty(lt), self.fmt_ty(rt)));
            }
            lt
          }
        }
      }

      NodeKind::PrefixOp { op, expr } => {
        let et = self.check_expr(ast, expr);
        ast[expr].flags |= NodeFlags::RVALUE;
        self.check_unop(op, et, loc)
      }
      NodeKind::PostfixOp { op, expr } => {
        let et = self.check_expr(ast, expr);
        self.check_unop(op, et, loc)
      }
      NodeKind::Deref { expr } => {
        let et = self.check_expr(ast, expr);
        self.check_unop(Op::Deref, et, loc)
      }

      NodeKind::Subscript { recv, index, .. } => {
        let rt = self.check_expr(ast, recv);
        let it = self.check_expr(ast, index);
        ast[index].flags |= NodeFlags::RVALUE;
        if !self.comp.types.is_integer(it) && it != Ty::UNKNOWN {
          self.error_at(ast[index].loc, format!(
            "non-integer index of type {}", self.fmt_ty(it)));
        }
        let base = self.comp.types.unwrap_alias(self.comp.types.unwrap_ptr(rt));
        match self.comp.types.data(base) {
          Type::Array(e, arlen) => {
            if let NodeKind::IntLit { val } = ast[index].kind {
              if let NodeKind::Subscript { index_val, .. } = &mut ast[n].kind {
                *index_val = val;
              }
              if arlen > 0 && val >= arlen {
                self.error_at(ast[index].loc, format!(
                  "index {val} out of bounds, array length {arlen}"));
              }
            }
            e
          }
          Type::Slice(e) | Type::MutSlice(e) => e,
          _ => {
            if base != Ty::UNKNOWN {
              self.error_at(loc, format!("cannot index {}", self.fmt_ty(rt)));
            }
            Ty::UNKNOWN
          }
        }
      }

      NodeKind::If { cond, thenb, elseb } => {
        let ct = self.check_expr(ast, cond);
        ast[cond].flags |= NodeFlags::RVALUE;

        // optional narrowing: "if x { ... }" with x of type ?T types x as T
        // inside the "then" branch
        let mut narrowed = None;
        if let Type::Optional(elem) = self.comp.types.data(ct) {
          if let NodeKind::Id { name, target: Some(t) } = ast[cond].kind {
            if let NodeKind::Local { lkind, nameloc, .. } = ast[t].kind {
              let shadow = ast.add(Node::new(NodeKind::Local {
                lkind, name, nameloc,
                texpr: None, init: None, isthis: false, ismut: false, offset: 0,
              }, nameloc));
              ast[shadow].ty = elem;
              ast[shadow].flags |= NodeFlags::NARROWED | NodeFlags::CHECKED;
              narrowed = Some((name, shadow));
            }
          }
        } else if ct != Ty::BOOL && ct != Ty::UNKNOWN {
          self.error_at(ast[cond].loc, format!(
            "conditional is not a boolean: {}", self.fmt_ty(ct)));
        }

        self.scope.push();
        if let Some((name, shadow)) = narrowed {
          self.scope.define(name, shadow);
        }
        let tt = self.check_block(ast, thenb);
        let et = match elseb {
          Some(e) => {
            // hide the "then" bindings (incl. narrowing) from "else"
            self.scope.stash();
            let et = if matches!(ast[e].kind, NodeKind::Block { .. }) {
              self.check_block(ast, e)
            } else {
              self.check_expr(ast, e)
            };
            self.scope.unstash();
            et
          }
          None => Ty::VOID,
        };
        self.scope.pop();

        if ast[n].flags.contains(NodeFlags::RVALUE) && elseb.is_some() {
          if !self.comp.types.is_compat(tt, et) && tt != Ty::UNKNOWN && et != Ty::UNKNOWN {
            self.error_at(loc, format!(
              "incompatible branch types {} and {}", self.fmt_ty(tt), self.fmt_ty(et)));
          }
          tt
        } else if ast[n].flags.contains(NodeFlags::RVALUE) {
          tt
        } else {
          Ty::VOID
        }
      }

      NodeKind::For { start, cond, body, end } => {
        self.scope.push();
        if let Some(s) = start {
          self.check_expr(ast, s);
        }
        let ct = self.check_expr(ast, cond);
        if ct != Ty::BOOL && ct != Ty::UNKNOWN {
          self.error_at(ast[cond].loc, format!(
            "for condition is not a boolean: {}", self.fmt_ty(ct)));
        }
        self.check_block(ast, body);
        if let Some(e) = end {
          self.check_expr(ast, e);
        }
        self.scope.pop();
        Ty::VOID
      }

      NodeKind::Return { value } => {
        let vt = match value {
          Some(v) => {
            self.check_expr(ast, v);
            ast[v].flags |= NodeFlags::RVALUE;
            self.coerce_intlit(ast, v, self.result_ty);
            ast[v].ty
          }
          None => Ty::VOID,
        };
        if !self.comp.types.is_compat(self.result_ty, vt) && vt != Ty::UNKNOWN {
          self.error_at(loc, format!(
            "invalid return type {}, expecting {}",
            self.fmt_ty(vt), self.fmt_ty(self.result_ty)));
        }
        vt
      }

      NodeKind::Block { .. } => return self.check_block(ast, n),
      NodeKind::Fun { .. } => return self.check_fun(ast, n),

      NodeKind::Import { .. } | NodeKind::Typedef { .. } => Ty::VOID,

      // type expressions in expression position
      _ => return self.resolve_texpr(ast, n),
    };
    ast[n].ty = ty;
    ast[n].flags |= NodeFlags::CHECKED;
    ty
  }

  fn check_unop(&mut self, op: Op, et: Ty, loc: Loc) -> Ty {
    let ts = &self.comp.types;
    match op {
      Op::Not => {
        if et != Ty::BOOL && et != Ty::UNKNOWN {
          self.error_at(loc, format!("cannot negate {}", self.fmt_ty(et)));
        }
        Ty::BOOL
      }
      Op::Neg => {
        if !ts.is_integer(et) && !ts.is_float(et) && et != Ty::UNKNOWN {
          self.error_at(loc, format!("cannot negate {}", self.fmt_ty(et)));
        }
        et
      }
      Op::BitNot | Op::Inc | Op::Dec => {
        if !ts.is_integer(et) && et != Ty::UNKNOWN {
          self.error_at(loc, format!(
            "operator requires an integer, got {}", self.fmt_ty(et)));
        }
        et
      }
      Op::Deref => match ts.data(ts.unwrap_alias(et)) {
        Type::Ptr(e) | Type::Ref(e) | Type::MutRef(e) => e,
        _ => {
          if et != Ty::UNKNOWN {
            self.error_at(loc, format!("cannot dereference {}", self.fmt_ty(et)));
          }
          Ty::UNKNOWN
        }
      },
      Op::Borrow => ts.intern(Type::Ref(et)),
      _ => et,
    }
  }

  fn check_id(
    &mut self,
    ast: &mut Ast,
    n: NodeId,
    name: Symbol,
    target: Option<NodeId>,
    loc: Loc,
  ) -> Ty {
    // the checker's scope is authoritative; it sees narrowed bindings
    if let Some(t) = self.scope.lookup(name) {
      if let NodeKind::Id { target, .. } = &mut ast[n].kind {
        *target = Some(t);
      }
      ast[t].nuse += 1;
      return ast[t].ty;
    }
    if let Some(t) = target {
      ast[t].nuse += 1;
      return ast[t].ty;
    }
    if let Some(ent) = self.pkg.def_get(name) {
      if ent.def.unit == self.unit_idx {
        if let NodeKind::Id { target, .. } = &mut ast[n].kind {
          *target = Some(ent.def.node);
        }
        ast[ent.def.node].nuse += 1;
      }
      return ent.ty;
    }
    match self.imports.get(&name).cloned() {
      Some(Imported::PkgNs(dep)) => {
        let t = self.comp.types.intern(Type::Ns { name });
        ast[n].kind = NodeKind::Ns { name, pkg: Some(dep) };
        ast[n].flags |= NodeFlags::PKGNS;
        t
      }
      Some(Imported::Sel(dep, orig)) => {
        match dep.def_get(orig) {
          Some(ent) if ent.vis == Vis::Pub => ent.ty,
          Some(_) => {
            self.error_at(loc, format!(
              "\"{}\" is private to package \"{}\"", self.name(orig), dep.path));
            Ty::UNKNOWN
          }
          None => {
            self.error_at(loc, format!(
              "package \"{}\" has no member \"{}\"", dep.path, self.name(orig)));
            Ty::UNKNOWN
          }
        }
      }
      None => {
        self.error_at(loc, format!("unknown identifier \"{}\"", self.name(name)));
        ast[n].flags |= NodeFlags::UNKNOWN;
        Ty::UNKNOWN
      }
    }
  }

  fn check_member(
    &mut self,
    ast: &mut Ast,
    _n: NodeId,
    recv: NodeId,
    name: Symbol,
    loc: Loc,
  ) -> Ty {
    let rt = self.check_expr(ast, recv);

    // package namespace member, e.g. "rt.foo" after `import "std/rt" as rt`
    if let NodeKind::Ns { pkg: Some(dep), .. } = &ast[recv].kind {
      let dep = dep.clone();
      return match dep.def_get(name) {
        Some(ent) if ent.vis == Vis::Pub => ent.ty,
        Some(_) => {
          self.error_at(loc, format!(
            "\"{}\" is private to package \"{}\"", self.name(name), dep.path));
          Ty::UNKNOWN
        }
        None => {
          self.error_at(loc, format!(
            "package \"{}\" has no member \"{}\"", dep.path, self.name(name)));
          Ty::UNKNOWN
        }
      };
    }

    // struct field
    let ts = &self.comp.types;
    let mut base = ts.unwrap_alias(rt);
    loop {
      match ts.data(base) {
        Type::Ref(e) | Type::MutRef(e) | Type::Ptr(e) => base = ts.unwrap_alias(e),
        _ => break,
      }
    }
    if let Type::Struct { fields, .. } = ts.data(base) {
      if let Some(f) = fields.iter().find(|f| f.name == name) {
        return f.ty;
      }
    }

    // type function
    if let Some(tf) = self.pkg.tfundefs.lookup(ts, rt, name) {
      return tf.ty;
    }
    for dep in self.pkg.imports.read().unwrap().iter() {
      if let Some(tf) = dep.tfundefs.lookup(ts, rt, name) {
        return tf.ty;
      }
    }

    if rt != Ty::UNKNOWN {
      self.error_at(loc, format!(
        "{} has no field or method \"{}\"", self.fmt_ty(rt), self.name(name)));
    }
    Ty::UNKNOWN
  }

  fn check_call(
    &mut self,
    ast: &mut Ast,
    n: NodeId,
    recv: NodeId,
    args: &[NodeId],
    loc: Loc,
  ) -> Ty {
    // call of a type is a type construction, e.g. "u8(x)"
    if let NodeKind::Id { name, .. } = ast[recv].kind {
      let namestr = self.name(name);
      let as_type = self.comp.types.prim_by_name(&namestr).or_else(|| {
        self.scope.lookup(name).map_or_else(
          || self.pkg.def_get(name)
            .filter(|ent| !matches!(self.comp.types.data(ent.ty), Type::Fun { .. }))
            .filter(|ent| ent.ty != Ty::UNKNOWN)
            .map(|ent| ent.ty),
          |_| None)
      });
      if let Some(t) = as_type {
        ast[recv].kind = NodeKind::TypeName { name, resolved: Some(t) };
        ast[recv].ty = t;
        ast[recv].flags |= NodeFlags::CHECKED;
        for &a in args {
          let at = self.check_expr(ast, a);
          ast[a].flags |= NodeFlags::RVALUE;
          if !self.comp.types.is_convertible(t, at) && at != Ty::UNKNOWN {
            self.error_at(ast[a].loc, format!(
              "cannot convert {} to {}", self.fmt_ty(at), self.fmt_ty(t)));
          }
        }
        if args.len() > 1 {
          self.error_at(loc, "too many arguments in type construction");
        }
        ast[n].kind = NodeKind::TypeCons { texpr: recv, args: args.to_vec() };
        return t;
      }
    }

    let ft = self.check_expr(ast, recv);
    let ft_unwrapped = self.comp.types.unwrap_alias(ft);
    let Type::Fun { params, result } = self.comp.types.data(ft_unwrapped) else {
      if ft != Ty::UNKNOWN {
        self.error_at(loc, format!("cannot call {}", self.fmt_ty(ft)));
      }
      return Ty::UNKNOWN;
    };

    // when calling through a member ("x.f()"), the receiver fills "this"
    let skip_this = matches!(ast[recv].kind, NodeKind::Member { .. })
      && params.first().is_some_and(|p| p.isthis);
    let expect: &[FunParam] = if skip_this { &params[1..] } else { &params };

    if args.len() != expect.len() {
      self.error_at(loc, format!(
        "wrong number of arguments; want {}, got {}", expect.len(), args.len()));
      self.help_fun_origin(ast, recv);
      return result;
    }

    for (i, &a) in args.iter().enumerate() {
      // named arguments match parameters by name
      let param = if let NodeKind::Local { lkind: LocalKind::Param, name, .. } = ast[a].kind {
        match expect.iter().find(|p| p.name == Some(name)) {
          Some(p) => p.clone(),
          None => {
            self.error_at(ast[a].loc, format!(
              "no parameter named \"{}\"", self.name(name)));
            continue;
          }
        }
      } else {
        expect[i].clone()
      };

      let at = match ast[a].kind.clone() {
        NodeKind::Local { init: Some(init), .. } => {
          self.check_expr(ast, init);
          ast[init].flags |= NodeFlags::RVALUE;
          self.coerce_intlit(ast, init, param.ty);
          let initty = ast[init].ty;
          ast[a].ty = initty;
          ast[a].flags |= NodeFlags::CHECKED;
          initty
        }
        _ => {
          self.check_expr(ast, a);
          ast[a].flags |= NodeFlags::RVALUE;
          self.coerce_intlit(ast, a, param.ty);
          ast[a].ty
        }
      };

      if !self.comp.types.is_compat(param.ty, at) && at != Ty::UNKNOWN {
        self.error_at(ast[a].loc, format!(
          "passing value of type {} where {} is expected",
          self.fmt_ty(at), self.fmt_ty(param.ty)));
        self.help_fun_origin(ast, recv);
      }
    }
    result
  }

  fn help_fun_origin(&self, ast: &Ast, recv: NodeId) {
    if let NodeKind::Id { name, target } = ast[recv].kind {
      let loc = target.map_or_else(
        || self.pkg.def_get(name).map_or(Loc::UNKNOWN, |e| e.loc),
        |t| ast[t].loc);
      self.help_at(loc, format!("\"{}\" defined here", self.name(name)));
    }
  }

  fn check_lvalue(&mut self, ast: &mut Ast, n: NodeId) -> Ty {
    let t = self.check_expr(ast, n);
    match ast[n].kind.clone() {
      NodeKind::Id { name, target: Some(tgt) } => {
        if let NodeKind::Local { lkind: LocalKind::Let, .. } = ast[tgt].kind {
          self.error_at(ast[n].loc, format!(
            "cannot assign to immutable binding \"{}\"", self.name(name)));
        }
      }
      NodeKind::Id { target: None, .. } |
      NodeKind::Member { .. } | NodeKind::Subscript { .. } |
      NodeKind::Deref { .. } => {}
      NodeKind::PrefixOp { op: Op::Deref, .. } => {}
      _ => self.error_at(ast[n].loc, "cannot assign to this expression"),
    }
    t
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::Compiler;
  use crate::loc::SrcFile;

  fn check(src: &str) -> (Compiler, Arc<Pkg>, Vec<Unit>) {
    let comp = Compiler::new_for_tests();
    comp.diag.set_handler(Box::new(|_| {}));
    let pkg = Arc::new(Pkg::new("/t/pkg".into(), "pkg".into(), "/t".into()));
    let file = SrcFile::new("t.co", src.as_bytes().to_vec());
    let unit = comp.parse_unit(file);
    let mut units = vec![unit];
    let _ = typecheck_pkg(&comp, &pkg, &mut units);
    (comp, pkg, units)
  }

  fn check_msgs(src: &str) -> (Compiler, Vec<String>) {
    let comp = Compiler::new_for_tests();
    let msgs: Arc<std::sync::Mutex<Vec<String>>> = Arc::default();
    let m2 = msgs.clone();
    comp.diag.set_handler(Box::new(move |d| m2.lock().unwrap().push(d.msg_short.clone())));
    let pkg = Arc::new(Pkg::new("/t/pkg".into(), "pkg".into(), "/t".into()));
    let file = SrcFile::new("t.co", src.as_bytes().to_vec());
    let unit = comp.parse_unit(file);
    let mut units = vec![unit];
    let _ = typecheck_pkg(&comp, &pkg, &mut units);
    let msgs = msgs.lock().unwrap().clone();
    (comp, msgs)
  }

  #[test]
  fn minimal_main_type() {
    let (comp, pkg, units) = check("fun main() {\n}\n");
    assert_eq!(comp.errcount(), 0);
    assert!(pkg.mainfun.lock().unwrap().is_some());
    let main = units[0].children[0];
    let ft = units[0].ast[main].ty;
    let Type::Fun { params, result } = comp.types.data(ft) else { panic!() };
    assert!(params.is_empty());
    assert_eq!(result, Ty::VOID);
  }

  #[test]
  fn fun_body_types() {
    let (comp, _pkg, units) = check("fun add(x, y int) int\n  x + y\n");
    assert_eq!(comp.errcount(), 0);
    let NodeKind::Fun { body: Some(b), .. } = &units[0].ast[units[0].children[0]].kind
    else { panic!() };
    let NodeKind::Block { children, .. } = &units[0].ast[*b].kind else { panic!() };
    assert_eq!(units[0].ast[children[0]].ty, Ty::INT);
    assert!(units[0].ast[*b].flags.contains(NodeFlags::RVALUE));
  }

  #[test]
  fn duplicate_definition_reported() {
    let (comp, msgs) = check_msgs("fun f() {\n}\nfun f() {\n}\n");
    assert!(comp.errcount() >= 1);
    assert!(msgs.iter().any(|m| m.contains("duplicate definition")));
    assert!(msgs.iter().any(|m| m.contains("defined here")));
  }

  #[test]
  fn struct_typedef_and_member() {
    let (comp, _pkg, units) = check(
      "type Point { x int; y int }\nfun getx(p Point) int\n  p.x\n");
    assert_eq!(comp.errcount(), 0);
    let td = units[0].children[0];
    let t = units[0].ast[td].ty;
    let Type::Struct { name: Some(_), fields } = comp.types.data(t) else {
      panic!("expected named struct, got {:?}", comp.types.data(t));
    };
    assert_eq!(fields.len(), 2);
  }

  #[test]
  fn self_referential_struct() {
    let (comp, _pkg, units) = check("type Node { next *Node; val int }\n");
    assert_eq!(comp.errcount(), 0);
    let t = units[0].ast[units[0].children[0]].ty;
    let Type::Struct { fields, .. } = comp.types.data(t) else { panic!() };
    let Type::Ptr(e) = comp.types.data(fields[0].ty) else { panic!() };
    assert_eq!(e, t);
    // owning pointer makes the struct own
    assert!(comp.types.flags(t).contains(TypeFlags::SUBOWNERS));
  }

  #[test]
  fn typefun_registered_and_found() {
    let (comp, pkg, units) = check(
      "type Foo { v int }\nfun size(this &Foo) int\n  1\nfun use(f Foo) int\n  f.size()\n");
    assert_eq!(comp.errcount(), 0);
    let foo = units[0].ast[units[0].children[0]].ty;
    let size = comp.syms.intern("size");
    assert!(pkg.tfundefs.lookup(&comp.types, foo, size).is_some());
  }

  #[test]
  fn call_mismatch_reports_signature() {
    let (comp, msgs) = check_msgs(
      "fun f(x int) {\n}\nfun g()\n  f(true)\n");
    assert!(comp.errcount() >= 1);
    assert!(msgs.iter().any(|m| m.contains("where int is expected")
      || m.contains("passing value")));
    assert!(msgs.iter().any(|m| m.contains("defined here")));
  }

  #[test]
  fn optional_narrowing() {
    let (comp, _pkg, units) = check(
      "fun f(x ?int) int {\n  if x {\n    return x\n  }\n  return 0\n}\n");
    assert_eq!(comp.errcount(), 0);
    // find the narrowed shadow binding
    let found = (0..units[0].ast.len()).any(|i| {
      let n = &units[0].ast[crate::Idx::from_usize(i)];
      n.flags.contains(NodeFlags::NARROWED) && n.ty == Ty::INT
    });
    assert!(found, "expected a narrowed binding of type int");
  }

  #[test]
  fn let_is_immutable() {
    let (comp, msgs) = check_msgs("fun f() {\n  let x = 1\n  x = 2\n}\n");
    assert!(comp.errcount() >= 1);
    assert!(msgs.iter().any(|m| m.contains("immutable")));
  }

  #[test]
  fn intlit_fits_smaller_types() {
    let (comp, _pkg, _units) = check("fun f() {\n  var x u8 = 200\n}\n");
    assert_eq!(comp.errcount(), 0);
    let (comp2, msgs) = check_msgs("fun f() {\n  var x u8 = 300\n}\n");
    assert!(comp2.errcount() >= 1);
    assert!(!msgs.is_empty());
  }

  #[test]
  fn return_type_checked() {
    let (comp, msgs) = check_msgs("fun f() int {\n  return true\n}\n");
    assert!(comp.errcount() >= 1);
    assert!(msgs.iter().any(|m| m.contains("invalid return type")));
  }

  #[test]
  fn template_instantiation() {
    let (comp, _pkg, units) = check(
      "type Box<T> { v T }\nfun f(b Box<int>) int\n  b.v\n");
    assert_eq!(comp.errcount(), 0);
    // the parameter's type is the substituted struct { v int }
    let NodeKind::Fun { params, .. } = &units[0].ast[units[0].children[1]].kind
    else { panic!() };
    let bt = units[0].ast[params[0]].ty;
    let Type::Struct { fields, .. } = comp.types.data(bt) else { panic!() };
    assert_eq!(fields[0].ty, Ty::INT);
    assert!(comp.types.flags(bt).contains(TypeFlags::TEMPLATEI));
  }

  #[test]
  fn pub_visibility_upgrade() {
    let (comp, pkg, _units) = check(
      "type T { v int }\npub fun f(x T) {\n}\n");
    assert_eq!(comp.errcount(), 0);
    let t = comp.syms.intern("T");
    assert_eq!(pkg.def_get(t).unwrap().vis, Vis::Pub);
  }
}
