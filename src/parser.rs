//! The parser: tokens to AST.
//!
//! A hand-written recursive-descent parser with Pratt-style expression
//! parsing driven by token class. Nodes are allocated in the unit's arena;
//! lexical scoping is tracked with a [`Scope`] so identifier expressions can
//! be resolved to their local definitions during parsing. Unresolved names
//! are flagged `UNKNOWN` and left to the type checker.
//!
//! Parse errors are reported through the diagnostics sink and parsing
//! continues at the next statement boundary where possible.

use std::sync::Arc;
use crate::Compiler;
use crate::diag::DiagKind;
use crate::loc::{Loc, Origin, SrcFile};
use crate::scanner::Scanner;
use crate::scope::Scope;
use crate::symbol::Symbol;
use crate::token::Tok;
use crate::types::{Op, Ty};
use crate::types::ast::{
  Ast, ImportSel, LocalKind, Node, NodeFlags, NodeId, NodeKind, Unit, Vis,
};

/// Binding powers, lowest to highest.
mod prec {
  pub const MIN: u8 = 0;
  pub const ASSIGN: u8 = 1;
  pub const LOGICAL_OR: u8 = 2;
  pub const LOGICAL_AND: u8 = 3;
  pub const CMP: u8 = 4;
  pub const ADD: u8 = 5;
  pub const MUL: u8 = 6;
  pub const UNARY: u8 = 7;
  pub const POSTFIX: u8 = 8;
}

#[derive(Clone)]
struct TokState {
  tok: Tok,
  loc: Loc,
  endloc: Loc,
  litint: u64,
  litfloat: f64,
  sym: Symbol,
  strval: Vec<u8>,
}

pub struct Parser<'c> {
  comp: &'c Compiler,
  sc: Scanner<'c>,
  cur: TokState,
  lookahead: Option<TokState>,
  scope: Scope,
  ast: Ast,
  children: Vec<NodeId>,
  importlist: Option<NodeId>,
  last_import: Option<NodeId>,
}

impl<'c> Parser<'c> {
  pub fn new(comp: &'c Compiler, srcfile: Arc<SrcFile>) -> Parser<'c> {
    let mut sc = Scanner::new(comp, srcfile);
    sc.parse_comments = comp.config.parse_comments;
    Parser {
      comp,
      sc,
      cur: TokState {
        tok: Tok::Eof,
        loc: Loc::UNKNOWN,
        endloc: Loc::UNKNOWN,
        litint: 0,
        litfloat: 0.0,
        sym: Symbol::UNDER,
        strval: Vec::new(),
      },
      lookahead: None,
      scope: Scope::new(),
      ast: Ast::new(),
      children: Vec::new(),
      importlist: None,
      last_import: None,
    }
  }

  /// Parse one source file into a unit.
  pub fn parse_unit(mut self) -> Unit {
    self.advance();
    self.scope.push();
    while self.cur.tok != Tok::Eof {
      if self.cur.tok == Tok::Semi {
        self.advance();
        continue;
      }
      let n = self.stmt_toplevel();
      self.children.push(n);
      self.expect_semi();
    }
    self.scope.pop();
    let srcfile = self.sc.srcfile().clone();
    Unit {
      ast: self.ast,
      children: self.children,
      srcfile,
      importlist: self.importlist,
    }
  }

  //——————————————————————————————————————————————————————————————————————
  // token plumbing

  fn snapshot(&self) -> TokState {
    TokState {
      tok: self.sc.tok,
      loc: self.sc.loc,
      endloc: self.sc.endloc,
      litint: self.sc.litint,
      litfloat: self.sc.litfloat,
      sym: self.sc.sym,
      strval: self.sc.strval().to_vec(),
    }
  }

  fn advance(&mut self) {
    if let Some(la) = self.lookahead.take() {
      self.cur = la;
      return;
    }
    self.sc.next();
    self.cur = self.snapshot();
  }

  /// The token after the current one.
  fn peek(&mut self) -> Tok {
    if self.lookahead.is_none() {
      self.sc.next();
      self.lookahead = Some(self.snapshot());
    }
    self.lookahead.as_ref().unwrap().tok
  }

  fn error_at(&self, loc: Loc, msg: impl Into<String>) {
    let origin = Origin::of_loc(&self.comp.locmap, loc);
    self.comp.diag.report(origin, DiagKind::Error, msg);
  }

  fn error(&self, msg: impl Into<String>) {
    self.error_at(self.cur.loc, msg);
  }

  fn unexpected(&mut self, what: &str) -> NodeId {
    self.error(format!("unexpected {}, expecting {what}", self.cur.tok.describe()));
    self.sync_stmt();
    self.bad()
  }

  /// Skip ahead to the next statement boundary.
  fn sync_stmt(&mut self) {
    let mut depth = 0u32;
    while !matches!(self.cur.tok, Tok::Eof) {
      match self.cur.tok {
        Tok::Semi if depth == 0 => return,
        Tok::LBrace => depth += 1,
        Tok::RBrace => {
          if depth == 0 {
            return;
          }
          depth -= 1;
        }
        _ => {}
      }
      self.advance();
    }
  }

  fn bad(&mut self) -> NodeId {
    self.ast.add(Node::new(NodeKind::Bad, self.cur.loc))
  }

  fn expect(&mut self, tok: Tok) -> bool {
    if self.cur.tok == tok {
      self.advance();
      return true;
    }
    self.error(format!(
      "expected {}, found {}", tok.describe(), self.cur.tok.describe()));
    false
  }

  fn expect_semi(&mut self) {
    match self.cur.tok {
      Tok::Semi => self.advance(),
      Tok::Eof | Tok::RBrace => {} // implicit statement end
      _ => {
        self.error(format!(
          "expected ';', found {}", self.cur.tok.describe()));
        self.sync_stmt();
        if self.cur.tok == Tok::Semi {
          self.advance();
        }
      }
    }
  }

  fn got(&mut self, tok: Tok) -> bool {
    if self.cur.tok == tok {
      self.advance();
      return true;
    }
    false
  }

  fn add(&mut self, kind: NodeKind, loc: Loc) -> NodeId {
    self.ast.add(Node::new(kind, loc))
  }

  fn bubble(&mut self, parent: NodeId, child: NodeId) {
    self.ast.bubble(parent, child);
  }

  //——————————————————————————————————————————————————————————————————————
  // statements

  fn stmt_toplevel(&mut self) -> NodeId {
    match self.cur.tok {
      Tok::KwImport => self.import_stmt(),
      Tok::KwPub => {
        let loc = self.cur.loc;
        self.advance();
        let n = match self.cur.tok {
          Tok::KwFun | Tok::KwType | Tok::KwVar | Tok::KwLet => self.stmt(),
          _ => {
            self.error_at(loc, "unexpected \"pub\"");
            self.stmt()
          }
        };
        self.ast[n].flags.set_vis(Vis::Pub);
        n
      }
      _ => self.stmt(),
    }
  }

  fn stmt(&mut self) -> NodeId {
    match self.cur.tok {
      Tok::KwFun => self.fun(false),
      Tok::KwType => self.typedef(),
      Tok::KwVar => self.vardef(LocalKind::Var),
      Tok::KwLet => self.vardef(LocalKind::Let),
      _ => self.expr(prec::MIN),
    }
  }

  // import "path" [as name] [(id [as alias], ...)]
  fn import_stmt(&mut self) -> NodeId {
    let loc = self.cur.loc;
    self.advance(); // consume "import"

    let pathloc = self.cur.loc;
    let path: Box<str> = if self.cur.tok == Tok::StrLit {
      let s = String::from_utf8_lossy(&self.cur.strval).into_owned();
      self.advance();
      s.into()
    } else {
      self.error("expected import path string");
      self.sync_stmt();
      "".into()
    };

    let mut name = Symbol::UNDER;
    let mut nameloc = Loc::UNKNOWN;
    if self.cur.tok == Tok::Id && self.cur.sym == Symbol::AS {
      self.advance();
      if self.cur.tok == Tok::Id {
        name = self.cur.sym;
        nameloc = self.cur.loc;
        self.advance();
      } else {
        self.error("expected package name after \"as\"");
      }
    }

    let mut ids = Vec::new();
    if self.got(Tok::LParen) {
      loop {
        if self.cur.tok != Tok::Id {
          self.error("expected identifier in import list");
          break;
        }
        let first = self.cur.sym;
        let firstloc = self.cur.loc;
        self.advance();
        if self.cur.tok == Tok::Id && self.cur.sym == Symbol::AS {
          self.advance();
          if self.cur.tok == Tok::Id {
            ids.push(ImportSel {
              name: self.cur.sym,
              origname: Some(first),
              loc: self.cur.loc,
              orignameloc: firstloc,
            });
            self.advance();
          } else {
            self.error("expected alias after \"as\"");
          }
        } else {
          ids.push(ImportSel {
            name: first, origname: None, loc: firstloc, orignameloc: firstloc,
          });
        }
        if !self.got(Tok::Comma) {
          break;
        }
      }
      self.expect(Tok::RParen);
    }

    let n = self.add(NodeKind::Import {
      path, pathloc, name, nameloc, ids, pkg: None, next_import: None,
    }, loc);

    // link into the unit's import list
    if let Some(prev) = self.last_import {
      let NodeKind::Import { next_import, .. } = &mut self.ast[prev].kind else {
        unreachable!();
      };
      *next_import = Some(n);
    } else {
      self.importlist = Some(n);
    }
    self.last_import = Some(n);

    // bind the local package name
    if name != Symbol::UNDER {
      self.scope.define(name, n);
    }
    n
  }

  // type Name T | type Name { fields } | type Name<T1, T2> T
  fn typedef(&mut self) -> NodeId {
    let loc = self.cur.loc;
    self.advance(); // consume "type"
    if self.cur.tok != Tok::Id {
      return self.unexpected("type name");
    }
    let name = self.cur.sym;
    let nameloc = self.cur.loc;
    self.advance();

    let mut tplparams = Vec::new();
    if self.got(Tok::Lt) {
      while self.cur.tok == Tok::Id {
        tplparams.push(self.cur.sym);
        self.advance();
        if !self.got(Tok::Comma) {
          break;
        }
      }
      self.expect(Tok::Gt);
      if tplparams.is_empty() {
        self.error_at(nameloc, "empty template parameter list");
      }
    }

    let texpr = self.type_expr();
    let n = self.add(NodeKind::Typedef { name, nameloc, texpr, tplparams }, loc);
    self.bubble(n, texpr);
    self.scope.define(name, n);
    n
  }

  // var|let name [T] [= init]
  fn vardef(&mut self, lkind: LocalKind) -> NodeId {
    let loc = self.cur.loc;
    self.advance(); // consume "var" / "let"
    if self.cur.tok != Tok::Id {
      return self.unexpected("variable name");
    }
    let name = self.cur.sym;
    let nameloc = self.cur.loc;
    self.advance();

    let texpr = if !matches!(self.cur.tok, Tok::Assign | Tok::Semi | Tok::Eof | Tok::RBrace) {
      Some(self.type_expr())
    } else {
      None
    };
    let init = if self.got(Tok::Assign) {
      Some(self.expr(prec::ASSIGN))
    } else {
      None
    };
    if texpr.is_none() && init.is_none() {
      self.error_at(nameloc, format!(
        "missing type or initializer for {}",
        self.comp.syms.name(name)));
    }
    if lkind == LocalKind::Let && init.is_none() {
      self.error_at(nameloc, "missing initializer for immutable binding");
    }

    let n = self.add(NodeKind::Local {
      lkind, name, nameloc, texpr, init,
      isthis: false, ismut: false, offset: 0,
    }, loc);
    if let Some(t) = texpr { self.bubble(n, t) }
    if let Some(i) = init { self.bubble(n, i) }
    self.scope.define(name, n);
    n
  }

  // fun name(params) [Result] [{ body }]
  // The first parameter may be "this T" or "mut this T", making this a
  // type function on T.
  fn fun(&mut self, is_expr: bool) -> NodeId {
    let loc = self.cur.loc;
    self.advance(); // consume "fun"

    let mut name = None;
    let mut nameloc = Loc::UNKNOWN;
    if self.cur.tok == Tok::Id {
      name = Some(self.cur.sym);
      nameloc = self.cur.loc;
      self.advance();
    } else if !is_expr {
      self.error("expected function name");
    }

    self.scope.push();

    let paramsloc = self.cur.loc;
    let mut params = Vec::new();
    let mut named = false;
    if self.expect(Tok::LParen) {
      self.params(&mut params, &mut named);
    }
    let paramsendloc = self.cur.loc;
    self.expect(Tok::RParen);

    let resultloc = self.cur.loc;
    let result = if !matches!(self.cur.tok, Tok::LBrace | Tok::Semi | Tok::Eof | Tok::RBrace) {
      Some(self.type_expr())
    } else {
      None
    };

    let body = if self.cur.tok == Tok::LBrace {
      Some(self.block())
    } else {
      None
    };

    self.scope.pop();

    let n = self.add(NodeKind::Fun {
      name, nameloc, params: params.clone(), result, body,
      recvt: Ty::UNKNOWN, paramsloc, paramsendloc, resultloc,
    }, loc);
    if named {
      self.ast[n].flags |= NodeFlags::NAMEDPARAMS;
    }
    for &p in &params { self.bubble(n, p) }
    if let Some(r) = result { self.bubble(n, r) }
    if let Some(b) = body { self.bubble(n, b) }

    if let Some(name) = name {
      if !is_expr {
        self.scope.define(name, n);
      }
    }
    n
  }

  // Parameters: "name Type" with Go-style grouping ("x, y int"), or the
  // special first parameter "[mut] this Type".
  fn params(&mut self, params: &mut Vec<NodeId>, named: &mut bool) {
    if self.cur.tok == Tok::RParen {
      return;
    }
    // indices of params that are awaiting a grouped type
    let mut untyped: Vec<usize> = Vec::new();
    loop {
      let mut ismut = false;
      let mut mutloc = Loc::UNKNOWN;
      if self.cur.tok == Tok::KwMut {
        ismut = true;
        mutloc = self.cur.loc;
        self.advance();
      }
      if self.cur.tok != Tok::Id {
        self.error("expected parameter name");
        self.sync_stmt();
        return;
      }
      let pname = self.cur.sym;
      let nameloc = self.cur.loc;
      self.advance();

      let isthis = pname == Symbol::THIS;
      if isthis && !params.is_empty() {
        self.error_at(nameloc, "\"this\" must be the first parameter");
      }
      if ismut && !isthis {
        self.error_at(mutloc, "unexpected \"mut\"; only the \"this\" parameter can be mut");
      }

      let texpr = if !matches!(self.cur.tok, Tok::Comma | Tok::RParen) {
        Some(self.type_expr())
      } else {
        None
      };

      let n = self.add(NodeKind::Local {
        lkind: LocalKind::Param,
        name: pname, nameloc, texpr, init: None,
        isthis, ismut, offset: 0,
      }, nameloc);
      if let Some(t) = texpr { self.bubble(n, t) }
      params.push(n);
      *named = true;
      self.scope.define(pname, n);

      match texpr {
        Some(t) => {
          // backfill grouped parameters, e.g. "x, y int"
          for &i in &untyped {
            let p = params[i];
            if let NodeKind::Local { texpr, .. } = &mut self.ast[p].kind {
              *texpr = Some(t);
            }
            self.bubble(p, t);
          }
          untyped.clear();
        }
        None => untyped.push(params.len() - 1),
      }

      if !self.got(Tok::Comma) {
        break;
      }
    }
    for &i in &untyped {
      let loc = self.ast[params[i]].loc;
      self.error_at(loc, "missing parameter type");
    }
  }

  // { stmt; ... }
  fn block(&mut self) -> NodeId {
    let loc = self.cur.loc;
    self.expect(Tok::LBrace);
    self.scope.push();
    let mut children = Vec::new();
    while !matches!(self.cur.tok, Tok::RBrace | Tok::Eof) {
      if self.got(Tok::Semi) {
        continue;
      }
      let n = self.stmt();
      children.push(n);
      if !matches!(self.cur.tok, Tok::RBrace | Tok::Eof) {
        self.expect_semi();
      }
    }
    self.scope.pop();
    let endloc = self.cur.loc;
    self.expect(Tok::RBrace);
    let n = self.add(NodeKind::Block { children: children.clone(), drops: vec![], endloc }, loc);
    for &c in &children { self.bubble(n, c) }
    n
  }

  //——————————————————————————————————————————————————————————————————————
  // expressions

  fn expr(&mut self, min_prec: u8) -> NodeId {
    let mut left = self.unary_expr();
    loop {
      let (op, lprec, rprec) = match self.cur.tok {
        Tok::OrOr => (Op::LOr, prec::LOGICAL_OR, prec::LOGICAL_OR + 1),
        Tok::AndAnd => (Op::LAnd, prec::LOGICAL_AND, prec::LOGICAL_AND + 1),
        Tok::Eq => (Op::Eq, prec::CMP, prec::CMP + 1),
        Tok::NEq => (Op::NEq, prec::CMP, prec::CMP + 1),
        Tok::Lt => (Op::Lt, prec::CMP, prec::CMP + 1),
        Tok::Gt => (Op::Gt, prec::CMP, prec::CMP + 1),
        Tok::LtEq => (Op::LtEq, prec::CMP, prec::CMP + 1),
        Tok::GtEq => (Op::GtEq, prec::CMP, prec::CMP + 1),
        Tok::Plus => (Op::Add, prec::ADD, prec::ADD + 1),
        Tok::Minus => (Op::Sub, prec::ADD, prec::ADD + 1),
        Tok::Or => (Op::Or, prec::ADD, prec::ADD + 1),
        Tok::Xor => (Op::Xor, prec::ADD, prec::ADD + 1),
        Tok::Star => (Op::Mul, prec::MUL, prec::MUL + 1),
        Tok::Slash => (Op::Div, prec::MUL, prec::MUL + 1),
        Tok::Percent => (Op::Mod, prec::MUL, prec::MUL + 1),
        Tok::Shl => (Op::Shl, prec::MUL, prec::MUL + 1),
        Tok::Shr => (Op::Shr, prec::MUL, prec::MUL + 1),
        Tok::And => (Op::And, prec::MUL, prec::MUL + 1),
        t if t.is_assign() => {
          if prec::ASSIGN < min_prec {
            return left;
          }
          let op = match t {
            Tok::AddAssign => Op::Add,
            Tok::SubAssign => Op::Sub,
            Tok::MulAssign => Op::Mul,
            Tok::DivAssign => Op::Div,
            Tok::ModAssign => Op::Mod,
            Tok::ShlAssign => Op::Shl,
            Tok::ShrAssign => Op::Shr,
            Tok::AndAssign => Op::And,
            Tok::XorAssign => Op::Xor,
            Tok::OrAssign => Op::Or,
            _ => Op::Noop, // plain "="
          };
          let loc = self.cur.loc;
          self.advance();
          let right = self.expr(prec::ASSIGN); // right-associative
          let n = self.add(NodeKind::Assign { op, left, right }, loc);
          self.bubble(n, left);
          self.bubble(n, right);
          left = n;
          continue;
        }
        _ => return left,
      };
      if lprec < min_prec {
        return left;
      }
      let loc = self.cur.loc;
      self.advance();
      let right = self.expr(rprec);
      let n = self.add(NodeKind::Binop { op, left, right }, loc);
      self.bubble(n, left);
      self.bubble(n, right);
      left = n;
    }
  }

  fn unary_expr(&mut self) -> NodeId {
    let loc = self.cur.loc;
    let op = match self.cur.tok {
      Tok::Not => Some(Op::Not),
      Tok::Tilde => Some(Op::BitNot),
      Tok::Minus => Some(Op::Neg),
      Tok::Star => Some(Op::Deref),
      Tok::And => Some(Op::Borrow),
      Tok::PlusPlus => Some(Op::Inc),
      Tok::MinusMinus => Some(Op::Dec),
      Tok::Plus => {
        self.advance();
        return self.unary_expr();
      }
      _ => None,
    };
    if let Some(op) = op {
      self.advance();
      let expr = self.unary_expr();
      let n = self.add(NodeKind::PrefixOp { op, expr }, loc);
      self.bubble(n, expr);
      return n;
    }
    self.postfix_expr()
  }

  fn postfix_expr(&mut self) -> NodeId {
    let mut n = self.primary_expr();
    loop {
      match self.cur.tok {
        Tok::LParen => n = self.call(n),
        Tok::Dot => {
          let loc = self.cur.loc;
          self.advance();
          if self.cur.tok != Tok::Id {
            self.error("expected member name after '.'");
            return n;
          }
          let name = self.cur.sym;
          self.advance();
          let m = self.add(NodeKind::Member { recv: n, name, target: None }, loc);
          self.bubble(m, n);
          n = m;
        }
        Tok::LBrack => {
          let loc = self.cur.loc;
          self.advance();
          let index = self.expr(prec::MIN);
          let endloc = self.cur.loc;
          self.expect(Tok::RBrack);
          let s = self.add(NodeKind::Subscript { recv: n, index, index_val: 0, endloc }, loc);
          self.bubble(s, n);
          self.bubble(s, index);
          n = s;
        }
        Tok::PlusPlus | Tok::MinusMinus => {
          let op = if self.cur.tok == Tok::PlusPlus { Op::Inc } else { Op::Dec };
          let loc = self.cur.loc;
          self.advance();
          let p = self.add(NodeKind::PostfixOp { op, expr: n }, loc);
          self.bubble(p, n);
          n = p;
        }
        _ => return n,
      }
    }
  }

  fn call(&mut self, recv: NodeId) -> NodeId {
    let loc = self.cur.loc;
    self.advance(); // consume "("
    let mut args = Vec::new();
    while !matches!(self.cur.tok, Tok::RParen | Tok::Eof) {
      // named argument: "name = expr"
      if self.cur.tok == Tok::Id && self.peek() == Tok::Assign {
        let name = self.cur.sym;
        let nameloc = self.cur.loc;
        self.advance(); // name
        self.advance(); // "="
        let init = self.expr(prec::ASSIGN);
        let a = self.add(NodeKind::Local {
          lkind: LocalKind::Param,
          name, nameloc, texpr: None, init: Some(init),
          isthis: false, ismut: false, offset: 0,
        }, nameloc);
        self.bubble(a, init);
        args.push(a);
      } else {
        args.push(self.expr(prec::ASSIGN));
      }
      if !self.got(Tok::Comma) {
        break;
      }
    }
    let argsendloc = self.cur.loc;
    self.expect(Tok::RParen);
    let n = self.add(NodeKind::Call { recv, args: args.clone(), argsendloc }, loc);
    self.bubble(n, recv);
    for &a in &args { self.bubble(n, a) }
    n
  }

  fn primary_expr(&mut self) -> NodeId {
    let loc = self.cur.loc;
    match self.cur.tok {
      Tok::Id => {
        let name = self.cur.sym;
        self.advance();
        let target = self.scope.lookup(name);
        let n = self.add(NodeKind::Id { name, target }, loc);
        if target.is_none() {
          self.ast[n].flags |= NodeFlags::UNKNOWN;
        }
        n
      }
      Tok::IntLit => {
        let val = self.cur.litint;
        self.advance();
        let n = self.add(NodeKind::IntLit { val }, loc);
        self.ast[n].ty = Ty::INT;
        self.ast[n].flags |= NodeFlags::CHECKED | NodeFlags::CONST;
        n
      }
      Tok::FloatLit => {
        let val = self.cur.litfloat;
        self.advance();
        let n = self.add(NodeKind::FloatLit { val }, loc);
        self.ast[n].ty = Ty::F64;
        self.ast[n].flags |= NodeFlags::CHECKED | NodeFlags::CONST;
        n
      }
      Tok::CharLit => {
        let val = self.cur.litint;
        self.advance();
        let n = self.add(NodeKind::IntLit { val }, loc);
        self.ast[n].ty = Ty::U32;
        self.ast[n].flags |= NodeFlags::CHECKED | NodeFlags::CONST;
        n
      }
      Tok::KwTrue | Tok::KwFalse => {
        let val = self.cur.tok == Tok::KwTrue;
        self.advance();
        let n = self.add(NodeKind::BoolLit { val }, loc);
        self.ast[n].ty = Ty::BOOL;
        self.ast[n].flags |= NodeFlags::CHECKED | NodeFlags::CONST;
        n
      }
      Tok::StrLit => {
        let bytes: Box<[u8]> = self.cur.strval.clone().into();
        self.advance();
        let n = self.add(NodeKind::StrLit { bytes }, loc);
        self.ast[n].flags |= NodeFlags::CONST;
        n
      }
      Tok::LBrack => {
        self.advance();
        let mut values = Vec::new();
        while !matches!(self.cur.tok, Tok::RBrack | Tok::Eof) {
          values.push(self.expr(prec::ASSIGN));
          if !self.got(Tok::Comma) {
            break;
          }
        }
        let endloc = self.cur.loc;
        self.expect(Tok::RBrack);
        let n = self.add(NodeKind::ArrayLit { values: values.clone(), endloc }, loc);
        for &v in &values { self.bubble(n, v) }
        n
      }
      Tok::LParen => {
        self.advance();
        let n = self.expr(prec::MIN);
        self.expect(Tok::RParen);
        n
      }
      Tok::LBrace => self.block(),
      Tok::KwIf => self.if_expr(),
      Tok::KwFor => self.for_expr(),
      Tok::KwReturn => {
        self.advance();
        let value = if matches!(self.cur.tok, Tok::Semi | Tok::Eof | Tok::RBrace) {
          None
        } else {
          Some(self.expr(prec::MIN))
        };
        let n = self.add(NodeKind::Return { value }, loc);
        if let Some(v) = value { self.bubble(n, v) }
        n
      }
      Tok::KwFun => self.fun(true),
      _ => self.unexpected("expression"),
    }
  }

  // if cond block [else (if | block)]
  fn if_expr(&mut self) -> NodeId {
    let loc = self.cur.loc;
    self.advance(); // consume "if"
    let cond = self.expr(prec::MIN);
    let thenb = self.block();
    let elseb = if self.got(Tok::KwElse) {
      if self.cur.tok == Tok::KwIf {
        Some(self.if_expr())
      } else {
        Some(self.block())
      }
    } else {
      None
    };
    let n = self.add(NodeKind::If { cond, thenb, elseb }, loc);
    self.bubble(n, cond);
    self.bubble(n, thenb);
    if let Some(e) = elseb { self.bubble(n, e) }
    n
  }

  // for [init;] cond [;end] body
  fn for_expr(&mut self) -> NodeId {
    let loc = self.cur.loc;
    self.advance(); // consume "for"
    self.scope.push();

    let (start, cond, end);
    if self.cur.tok == Tok::LBrace {
      // infinite loop: "for {}"
      let t = self.add(NodeKind::BoolLit { val: true }, loc);
      self.ast[t].ty = Ty::BOOL;
      self.ast[t].flags |= NodeFlags::CHECKED | NodeFlags::CONST;
      (start, cond, end) = (None, t, None);
    } else {
      let first = match self.cur.tok {
        Tok::KwVar => self.vardef(LocalKind::Var),
        Tok::KwLet => self.vardef(LocalKind::Let),
        _ => self.expr(prec::MIN),
      };
      if self.got(Tok::Semi) {
        let c = self.expr(prec::MIN);
        let e = if self.got(Tok::Semi) {
          Some(self.expr(prec::MIN))
        } else {
          None
        };
        (start, cond, end) = (Some(first), c, e);
      } else {
        (start, cond, end) = (None, first, None);
      }
    }

    let body = self.block();
    self.scope.pop();
    let n = self.add(NodeKind::For { start, cond, body, end }, loc);
    if let Some(s) = start { self.bubble(n, s) }
    self.bubble(n, cond);
    self.bubble(n, body);
    if let Some(e) = end { self.bubble(n, e) }
    n
  }

  //——————————————————————————————————————————————————————————————————————
  // type expressions

  fn type_expr(&mut self) -> NodeId {
    let loc = self.cur.loc;
    match self.cur.tok {
      Tok::Id => {
        let name = self.cur.sym;
        self.advance();
        let n = self.add(NodeKind::TypeName { name, resolved: None }, loc);
        if self.cur.tok == Tok::Lt {
          return self.type_instance(n);
        }
        n
      }
      Tok::Star => {
        self.advance();
        let elem = self.type_expr();
        let n = self.add(NodeKind::TypePtr { elem }, loc);
        self.bubble(n, elem);
        n
      }
      Tok::Question => {
        self.advance();
        let elem = self.type_expr();
        let n = self.add(NodeKind::TypeOpt { elem }, loc);
        self.bubble(n, elem);
        n
      }
      Tok::And | Tok::AndAnd => self.ref_type(false),
      Tok::KwMut => {
        self.advance();
        if !matches!(self.cur.tok, Tok::And | Tok::AndAnd) {
          return self.unexpected("'&' after \"mut\"");
        }
        self.ref_type(true)
      }
      Tok::LBrack => {
        // [T] or [T len]
        self.advance();
        let elem = self.type_expr();
        let len = if self.cur.tok != Tok::RBrack {
          Some(self.expr(prec::MIN))
        } else {
          None
        };
        let endloc = self.cur.loc;
        self.expect(Tok::RBrack);
        let n = self.add(NodeKind::TypeArray { elem, len, endloc }, loc);
        self.bubble(n, elem);
        n
      }
      Tok::LBrace => {
        // struct body: { name T; ... }
        self.advance();
        let mut fields = Vec::new();
        while !matches!(self.cur.tok, Tok::RBrace | Tok::Eof) {
          if self.got(Tok::Semi) {
            continue;
          }
          if self.cur.tok != Tok::Id {
            self.error("expected field name");
            self.sync_stmt();
            break;
          }
          let fname = self.cur.sym;
          let nameloc = self.cur.loc;
          self.advance();
          let ftype = self.type_expr();
          let init = if self.got(Tok::Assign) {
            Some(self.expr(prec::ASSIGN))
          } else {
            None
          };
          let f = self.add(NodeKind::Local {
            lkind: LocalKind::Field,
            name: fname, nameloc, texpr: Some(ftype), init,
            isthis: false, ismut: false, offset: 0,
          }, nameloc);
          self.bubble(f, ftype);
          fields.push(f);
          if !matches!(self.cur.tok, Tok::RBrace | Tok::Eof) {
            self.expect_semi();
          }
        }
        self.expect(Tok::RBrace);
        let n = self.add(NodeKind::TypeStructBody { fields: fields.clone() }, loc);
        for &f in &fields { self.bubble(n, f) }
        n
      }
      Tok::KwFun => {
        // function type: fun(T, T) R
        self.advance();
        self.expect(Tok::LParen);
        let mut params = Vec::new();
        while !matches!(self.cur.tok, Tok::RParen | Tok::Eof) {
          params.push(self.type_expr());
          if !self.got(Tok::Comma) {
            break;
          }
        }
        self.expect(Tok::RParen);
        let result = if !matches!(self.cur.tok,
          Tok::Semi | Tok::Eof | Tok::RBrace | Tok::RParen | Tok::Comma | Tok::LBrace)
        {
          Some(self.type_expr())
        } else {
          None
        };
        let n = self.add(NodeKind::TypeFun { params: params.clone(), result }, loc);
        for &p in &params { self.bubble(n, p) }
        n
      }
      _ => self.unexpected("type"),
    }
  }

  // &T, &[T], mut&T, mut&[T]
  fn ref_type(&mut self, ismut: bool) -> NodeId {
    let loc = self.cur.loc;
    let doubled = self.cur.tok == Tok::AndAnd; // "&&T" is "&(&T)"
    self.advance();
    if self.cur.tok == Tok::LBrack {
      self.advance();
      let elem = self.type_expr();
      let endloc = self.cur.loc;
      self.expect(Tok::RBrack);
      let n = self.add(NodeKind::TypeSlice { elem, ismut, endloc }, loc);
      self.bubble(n, elem);
      return n;
    }
    let elem = self.type_expr();
    let inner = if doubled {
      let i = self.add(NodeKind::TypeRef { elem, ismut: false }, loc);
      self.bubble(i, elem);
      i
    } else {
      elem
    };
    let n = self.add(NodeKind::TypeRef { elem: inner, ismut }, loc);
    self.bubble(n, inner);
    n
  }

  // Name<T1, T2>
  fn type_instance(&mut self, recv: NodeId) -> NodeId {
    let loc = self.cur.loc;
    self.advance(); // consume "<"
    let mut args = Vec::new();
    while !matches!(self.cur.tok, Tok::Gt | Tok::Eof) {
      args.push(self.type_expr());
      if !self.got(Tok::Comma) {
        break;
      }
    }
    let endloc = self.cur.loc;
    self.expect(Tok::Gt);
    let n = self.add(NodeKind::TypeInstance { recv, args: args.clone(), endloc }, loc);
    self.bubble(n, recv);
    for &a in &args { self.bubble(n, a) }
    n
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(src: &str) -> (Unit, u32) {
    let comp = Compiler::new_for_tests();
    comp.diag.set_handler(Box::new(|_| {}));
    let file = SrcFile::new("test.co", src.as_bytes().to_vec());
    let unit = Parser::new(&comp, file).parse_unit();
    (unit, comp.diag.errcount())
  }

  #[test]
  fn minimal_main() {
    let (unit, err) = parse("fun main() {\n}\n");
    assert_eq!(err, 0);
    assert_eq!(unit.children.len(), 1);
    let NodeKind::Fun { name, params, result, body, .. } = &unit.ast[unit.children[0]].kind
    else { panic!("expected fun") };
    assert!(name.is_some());
    assert!(params.is_empty());
    assert!(result.is_none());
    assert!(body.is_some());
  }

  #[test]
  fn offside_body() {
    let (unit, err) = parse("fun main()\n  var x = 1\n  x\n");
    assert_eq!(err, 0);
    let NodeKind::Fun { body: Some(body), .. } = &unit.ast[unit.children[0]].kind
    else { panic!() };
    let NodeKind::Block { children, .. } = &unit.ast[*body].kind else { panic!() };
    assert_eq!(children.len(), 2);
    // second statement resolves to the var
    let NodeKind::Id { target, .. } = unit.ast[children[1]].kind else { panic!() };
    assert_eq!(target, Some(children[0]));
  }

  #[test]
  fn grouped_params() {
    let (unit, err) = parse("fun add(x, y int) int\n  x + y\n");
    assert_eq!(err, 0);
    let NodeKind::Fun { params, .. } = &unit.ast[unit.children[0]].kind else { panic!() };
    assert_eq!(params.len(), 2);
    for &p in params {
      let NodeKind::Local { texpr, .. } = &unit.ast[p].kind else { panic!() };
      assert!(texpr.is_some());
    }
  }

  #[test]
  fn this_param() {
    let (unit, err) = parse("type Foo { x int }\nfun size(this Foo) int\n  1\n");
    assert_eq!(err, 0);
    let NodeKind::Fun { params, .. } = &unit.ast[unit.children[1]].kind else { panic!() };
    let NodeKind::Local { isthis, .. } = unit.ast[params[0]].kind else { panic!() };
    assert!(isthis);
  }

  #[test]
  fn imports_linked() {
    let (unit, err) = parse(
      "import \"std/runtime\"\nimport \"foo/bar\" as fb (a, b as c)\nfun main() {}\n");
    assert_eq!(err, 0);
    let imports: Vec<NodeId> = unit.imports().collect();
    assert_eq!(imports.len(), 2);
    let NodeKind::Import { path, .. } = &unit.ast[imports[0]].kind else { panic!() };
    assert_eq!(&**path, "std/runtime");
    let NodeKind::Import { path, name, ids, .. } = &unit.ast[imports[1]].kind
    else { panic!() };
    assert_eq!(&**path, "foo/bar");
    assert_ne!(*name, Symbol::UNDER);
    assert_eq!(ids.len(), 2);
    assert_eq!(ids[1].origname.map(|_| ()), Some(()));
  }

  #[test]
  fn precedence() {
    let (unit, err) = parse("fun f() int\n  1 + 2 * 3\n");
    assert_eq!(err, 0);
    let NodeKind::Fun { body: Some(b), .. } = &unit.ast[unit.children[0]].kind
    else { panic!() };
    let NodeKind::Block { children, .. } = &unit.ast[*b].kind else { panic!() };
    let NodeKind::Binop { op, right, .. } = unit.ast[children[0]].kind else { panic!() };
    assert_eq!(op, Op::Add);
    let NodeKind::Binop { op: rop, .. } = unit.ast[right].kind else { panic!() };
    assert_eq!(rop, Op::Mul);
  }

  #[test]
  fn type_exprs() {
    let (unit, err) = parse("type P *int\ntype R mut&[u8]\ntype O ?bool\n");
    assert_eq!(err, 0);
    assert_eq!(unit.children.len(), 3);
    let NodeKind::Typedef { texpr, .. } = unit.ast[unit.children[0]].kind else { panic!() };
    assert!(matches!(unit.ast[texpr].kind, NodeKind::TypePtr { .. }));
    let NodeKind::Typedef { texpr, .. } = unit.ast[unit.children[1]].kind else { panic!() };
    assert!(matches!(unit.ast[texpr].kind, NodeKind::TypeSlice { ismut: true, .. }));
    let NodeKind::Typedef { texpr, .. } = unit.ast[unit.children[2]].kind else { panic!() };
    assert!(matches!(unit.ast[texpr].kind, NodeKind::TypeOpt { .. }));
  }

  #[test]
  fn error_recovery_continues() {
    let (unit, err) = parse("fun f() {\n  ) bogus\n}\nfun g() {\n}\n");
    assert!(err > 0);
    // parser recovered and still produced both functions
    assert!(unit.children.len() >= 2);
  }

  #[test]
  fn named_call_args() {
    let (unit, err) = parse("fun f() {\n  g(width = 2, 3)\n}\n");
    assert_eq!(err, 0);
    let NodeKind::Fun { body: Some(b), .. } = &unit.ast[unit.children[0]].kind
    else { panic!() };
    let NodeKind::Block { children, .. } = &unit.ast[*b].kind else { panic!() };
    let NodeKind::Call { args, .. } = &unit.ast[children[0]].kind else { panic!() };
    assert_eq!(args.len(), 2);
    assert!(matches!(unit.ast[args[0]].kind,
      NodeKind::Local { lkind: LocalKind::Param, .. }));
  }
}
