//! Human-readable IR dumps, used by tests and `--print-ir` style debugging.
//!
//! ```text
//! fun f
//! b0:
//!   v0 bool = ARG 0
//!   v1 *int = ARG 1
//! switch v0 -> b1 b2
//! b1: <- b0  # b0.then
//!   v2 *int = MOVE v1
//! goto -> b3
//! ```

use std::fmt::Write as _;
use itertools::Itertools;
use crate::{Compiler, Idx};
use crate::types::Op;
use crate::types::ir::{Aux, BlockKind, IrFun, IrUnit, ValId};

/// Format a whole unit.
#[must_use] pub fn fmt_unit(comp: &Compiler, u: &IrUnit) -> String {
  let mut out = String::new();
  for f in &u.funs {
    out.push_str(&fmt_fun(comp, f));
    out.push('\n');
  }
  out
}

fn val_str(v: ValId) -> String {
  format!("v{}", v.into_usize())
}

/// Format one function.
#[must_use] pub fn fmt_fun(comp: &Compiler, f: &IrFun) -> String {
  let mut out = String::new();
  let _ = writeln!(out, "fun {}", f.name);

  for &bid in &f.order {
    let b = &f[bid];

    let _ = write!(out, "b{}:", bid.into_usize());
    let preds: Vec<String> = b.preds.iter().flatten()
      .map(|p| format!("b{}", p.into_usize()))
      .collect();
    if !preds.is_empty() {
      let _ = write!(out, " <- {}", preds.join(" "));
    }
    if let Some(c) = &b.comment {
      let _ = write!(out, "  # {c}");
    }
    out.push('\n');

    for &vid in &b.values {
      let v = &f[vid];
      let _ = write!(out, "  {} {} = {}",
        val_str(vid), comp.types.fmt(&comp.syms, v.ty), v.op.name());
      if !v.args.is_empty() {
        let _ = write!(out, " {}", v.args.iter().map(|&a| val_str(a)).join(" "));
      }
      match &v.aux {
        Aux::I64(x) if v.op == Op::IConst => { let _ = write!(out, " 0x{x:x}"); }
        Aux::I64(x) => { let _ = write!(out, " {x}"); }
        Aux::F64(x) => { let _ = write!(out, " {x}"); }
        Aux::Bytes(bs) => {
          let _ = write!(out, " \"{}\"", String::from_utf8_lossy(bs).escape_default());
        }
        Aux::FunIdx(i) => { let _ = write!(out, " fun{i}"); }
        Aux::None | Aux::Block(_) => {}
      }
      if let Some(c) = &v.comment {
        let _ = write!(out, "  # {c}");
      }
      out.push('\n');
    }

    match b.kind {
      BlockKind::Goto => {
        let succs: Vec<String> = b.succs.iter().flatten()
          .map(|s| format!("b{}", s.into_usize()))
          .collect();
        let _ = writeln!(out, "goto -> {}", succs.join(" "));
      }
      BlockKind::Switch => {
        let control = b.control.map_or_else(|| "?".into(), val_str);
        let succs: Vec<String> = b.succs.iter().flatten()
          .map(|s| format!("b{}", s.into_usize()))
          .collect();
        // switch control -> [else, then]
        let _ = writeln!(out, "switch {control} -> {}", succs.join(" "));
      }
      BlockKind::Ret => {
        match b.control {
          Some(v) => { let _ = writeln!(out, "ret {}", val_str(v)); }
          None => { let _ = writeln!(out, "ret"); }
        }
      }
    }
  }
  out
}
