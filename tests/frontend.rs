//! End-to-end tests of the front-end pipeline: source text through scanner,
//! parser, typecheck, dependency check and IR construction.

use std::sync::Arc;
use compis::{Compiler, Idx};
use compis::loc::SrcFile;
use compis::pkg::Pkg;
use compis::types::{Op, Ty, Type};
use compis::types::ir::{Aux, BlockKind, IrFun, IrUnit};

fn compile(src: &str) -> (Compiler, Arc<Pkg>, Vec<IrUnit>) {
  let comp = Compiler::new_for_tests();
  comp.diag.set_handler(Box::new(|_| {}));
  let pkg = Arc::new(Pkg::new("/t/main".into(), "main".into(), "/t".into()));
  let file = SrcFile::new("main.co", src.as_bytes().to_vec());
  let mut units = vec![comp.parse_unit(file)];
  let irunits = comp.compile_pkg_units(&pkg, &mut units).unwrap_or_else(|e| {
    panic!("compile failed: {e:?} (errcount {})", comp.errcount());
  });
  (comp, pkg, irunits)
}

fn fun<'a>(u: &'a IrUnit, name: &str) -> &'a IrFun {
  u.funs.iter().find(|f| f.name == name)
    .unwrap_or_else(|| panic!("no function {name:?}"))
}

#[test]
fn minimal_main() {
  let (comp, pkg, ir) = compile("fun main() {\n}\n");
  assert_eq!(comp.errcount(), 0);
  assert!(pkg.mainfun.lock().unwrap().is_some());

  let f = fun(&ir[0], "main");
  let Type::Fun { params, result } = comp.types.data(f.ty) else { panic!() };
  assert!(params.is_empty());
  assert_eq!(result, Ty::VOID);

  // one block, kind RET, no values
  assert_eq!(f.order.len(), 1);
  let b = &f[f.entry()];
  assert_eq!(b.kind, BlockKind::Ret);
  assert!(b.values.is_empty());
  assert!(b.control.is_none());
}

#[test]
fn integer_constants_interned() {
  let (_comp, _pkg, ir) = compile("fun g() int\n  1 + 1\n");
  let f = fun(&ir[0], "g");
  let b0 = &f[f.entry()];
  let nconsts = b0.values.iter().filter(|&&v| f[v].op == Op::IConst).count();
  assert_eq!(nconsts, 1, "expected exactly one ICONST 0x1");
  let c = b0.values.iter().find(|&&v| f[v].op == Op::IConst).unwrap();
  assert_eq!(f[*c].aux, Aux::I64(1));
  // the ADD uses the same constant twice
  let add = b0.values.iter().find(|&&v| f[v].op == Op::Add).unwrap();
  assert_eq!(f[*add].args.as_slice(), &[*c, *c]);
  // and the function returns it
  assert_eq!(b0.kind, BlockKind::Ret);
  assert_eq!(b0.control, Some(*add));
}

#[test]
fn constants_sorted_ints_before_floats() {
  let (_comp, _pkg, ir) = compile(
    "fun g() f64\n  var a = 7\n  var b = 3\n  var c = 2.5\n  var d = 1.5\n  c\n");
  let f = fun(&ir[0], "g");
  let b0 = &f[f.entry()];
  let mut ints = vec![];
  let mut floats = vec![];
  let mut saw_float = false;
  for &v in &b0.values {
    match f[v].op {
      Op::IConst => {
        assert!(!saw_float, "ICONST after FCONST");
        ints.push(f[v].aux.as_i64());
      }
      Op::FConst => {
        saw_float = true;
        let Aux::F64(x) = f[v].aux else { panic!() };
        floats.push(x);
      }
      _ => break,
    }
  }
  let mut si = ints.clone();
  si.sort_unstable();
  assert_eq!(ints, si, "int constants sorted by value");
  let mut sf = floats.clone();
  sf.sort_by(f64::total_cmp);
  assert_eq!(floats, sf, "float constants sorted by value");
}

#[test]
fn implicit_return_of_last_expression() {
  let (_comp, _pkg, ir) = compile("fun add(x, y int) int\n  x + y\n");
  let f = fun(&ir[0], "add");
  let b0 = &f[f.entry()];
  assert_eq!(b0.kind, BlockKind::Ret);
  let control = b0.control.expect("missing return value");
  assert_eq!(f[control].op, Op::Add);
}

#[test]
fn ssa_phi_for_if_else_value() {
  let (_comp, _pkg, ir) = compile(
    "fun pick(c bool, a, b int) int {\n  if c {\n    a + 1\n  } else {\n    b * 2\n  }\n}\n");
  let f = fun(&ir[0], "pick");
  // a switch block and a phi joining the branch values
  let has_switch = f.order.iter().any(|&b| f[b].kind == BlockKind::Switch);
  assert!(has_switch, "missing switch block:\n{:#?}", f.order);
  let phi = f.order.iter()
    .flat_map(|&b| f[b].values.iter())
    .find(|&&v| f[v].op == Op::Phi);
  let phi = *phi.expect("missing phi");
  assert_eq!(f[phi].args.len(), 2);
}

#[test]
fn ssa_structure_is_wellformed() {
  // Every value used as an argument is produced in the same block or in a
  // dominating block; every phi has one incoming value per predecessor.
  let (_comp, _pkg, ir) = compile(
    "fun f(c bool, n int) int {\n  var x = 1\n  if c {\n    x = n\n  }\n  x + 1\n}\n");
  for f in &ir[0].funs {
    check_ssa(f);
  }
}

fn check_ssa(f: &IrFun) {
  use std::collections::{HashMap, HashSet};

  // block of each value
  let mut val_block = HashMap::new();
  for &b in &f.order {
    for &v in &f[b].values {
      val_block.insert(v, b);
    }
  }

  // simple iterative dominator computation over the block order
  let entry = f.entry();
  let mut dom: HashMap<_, HashSet<_>> = HashMap::new();
  let all: HashSet<_> = f.order.iter().copied().collect();
  for &b in &f.order {
    dom.insert(b, if b == entry {
      [b].into_iter().collect()
    } else {
      all.clone()
    });
  }
  let mut changed = true;
  while changed {
    changed = false;
    for &b in &f.order {
      if b == entry {
        continue;
      }
      let preds: Vec<_> = f[b].preds.iter().flatten().copied()
        .filter(|p| all.contains(p))
        .collect();
      if preds.is_empty() {
        continue;
      }
      let mut next: HashSet<_> = dom[&preds[0]].clone();
      for p in &preds[1..] {
        next = next.intersection(&dom[p]).copied().collect();
      }
      next.insert(b);
      if next != dom[&b] {
        dom.insert(b, next);
        changed = true;
      }
    }
  }

  for &b in &f.order {
    for &v in &f[b].values {
      if f[v].op == Op::Phi {
        // one incoming value per predecessor edge
        assert_eq!(f[v].args.len() as u32, f[b].npreds(),
          "phi {v:?} in {b:?} has {} args for {} preds",
          f[v].args.len(), f[b].npreds());
        continue;
      }
      for &arg in &f[v].args {
        let Some(&ab) = val_block.get(&arg) else { continue };
        assert!(ab == b || dom[&b].contains(&ab),
          "{v:?} in {b:?} uses {arg:?} from non-dominating {ab:?}");
      }
    }
  }
}

#[test]
fn deterministic_ir_output() {
  // identical input produces identical block/value ids and drop placement
  let src = "fun f(c bool, x *int) {\n  if c {\n    var y = x\n  }\n}\n\
             fun main() {\n}\n";
  let (comp1, _p1, ir1) = compile(src);
  let (comp2, _p2, ir2) = compile(src);
  let d1 = compis::irfmt::fmt_unit(&comp1, &ir1[0]);
  let d2 = compis::irfmt::fmt_unit(&comp2, &ir2[0]);
  assert_eq!(d1, d2);
  assert!(d1.contains("DROP"));
}

#[test]
fn type_construction_casts() {
  let (_comp, _pkg, ir) = compile("fun f(x int) u8\n  u8(x)\n");
  let f = fun(&ir[0], "f");
  let cast = f.order.iter()
    .flat_map(|&b| f[b].values.iter())
    .find(|&&v| f[v].op == Op::Cast);
  assert!(cast.is_some(), "expected a CAST value");
}

#[test]
fn string_literal_value() {
  let (_comp, _pkg, ir) = compile("fun f() {\n  var s = \"hi\"\n}\n");
  let f = fun(&ir[0], "f");
  let s = f.order.iter()
    .flat_map(|&b| f[b].values.iter())
    .find(|&&v| f[v].op == Op::Str)
    .copied()
    .expect("expected a STR value");
  assert_eq!(f[s].aux, Aux::Bytes(b"hi".to_vec().into_boxed_slice()));
}

#[test]
fn narrowed_optional_compiles() {
  let (comp, _pkg, _ir) = compile(
    "fun f(x ?int) int {\n  if x {\n    return x\n  }\n  return 0\n}\n");
  assert_eq!(comp.errcount(), 0);
}

#[test]
fn ocheck_for_optional_condition() {
  let (_comp, _pkg, ir) = compile(
    "fun f(x ?int) int {\n  if x {\n    return 1\n  }\n  return 0\n}\n");
  let f = fun(&ir[0], "f");
  let has_ocheck = f.order.iter()
    .flat_map(|&b| f[b].values.iter())
    .any(|&v| f[v].op == Op::OCheck);
  assert!(has_ocheck, "optional condition lowers to OCHECK");
}
