//! Ownership analysis tests: MOVE/DROP insertion, the MOVE→DROP peephole,
//! conditional drops and deadset reconciliation across `if` branches.

use std::sync::Arc;
use compis::{Compiler, Idx};
use compis::loc::SrcFile;
use compis::pkg::Pkg;
use compis::types::{Op, Type};
use compis::types::ast::{NodeKind, Unit};
use compis::types::ir::{BlockKind, IrFun, IrUnit, ValId};

fn compile(src: &str) -> (Compiler, Vec<Unit>, Vec<IrUnit>) {
  let comp = Compiler::new_for_tests();
  comp.diag.set_handler(Box::new(|_| {}));
  let pkg = Arc::new(Pkg::new("/t/main".into(), "main".into(), "/t".into()));
  let file = SrcFile::new("main.co", src.as_bytes().to_vec());
  let mut units = vec![comp.parse_unit(file)];
  let irunits = comp.compile_pkg_units(&pkg, &mut units).unwrap_or_else(|e| {
    panic!("compile failed: {e:?} (errcount {})", comp.errcount());
  });
  (comp, units, irunits)
}

fn fun<'a>(u: &'a IrUnit, name: &str) -> &'a IrFun {
  u.funs.iter().find(|f| f.name == name)
    .unwrap_or_else(|| panic!("no function {name:?}"))
}

fn ops_of(f: &IrFun) -> Vec<Op> {
  f.order.iter().flat_map(|&b| f[b].values.iter().map(|&v| f[v].op)).collect()
}

fn find_op(f: &IrFun, op: Op) -> Vec<ValId> {
  f.order.iter()
    .flat_map(|&b| f[b].values.iter().copied())
    .filter(|&v| f[v].op == op)
    .collect()
}

#[test]
fn move_and_drop() {
  // "var y = x" transfers ownership of the pointer; leaving the scope
  // drops y. The MOVE;DROP pair in a single block collapses into one DROP
  // of the argument.
  let (comp, units, ir) = compile("fun f(x *int) {\n  var y = x\n}\n");
  let f = fun(&ir[0], "f");
  assert_eq!(f.order.len(), 1);
  let b0 = &f[f.entry()];

  let ops: Vec<Op> = b0.values.iter().map(|&v| f[v].op).collect();
  assert_eq!(ops, [Op::Arg, Op::Drop], "got {ops:?}");

  let arg = b0.values[0];
  let drop = b0.values[1];
  assert_eq!(f[drop].args.as_slice(), &[arg]);
  let Type::Ptr(elem) = comp.types.data(f[arg].ty) else { panic!() };
  assert_eq!(elem, compis::types::Ty::INT);

  // the drop was backpropagated into the function body's drop list
  let body = units[0].children.iter().find_map(|&c| {
    match units[0].ast[c].kind {
      NodeKind::Fun { body, .. } => body,
      _ => None,
    }
  }).unwrap();
  let NodeKind::Block { drops, .. } = &units[0].ast[body].kind else { panic!() };
  assert_eq!(drops.len(), 1);
}

#[test]
fn unused_owning_param_dropped_at_exit() {
  let (_comp, _units, ir) = compile("fun f(x *int) {\n}\n");
  let f = fun(&ir[0], "f");
  let b0 = &f[f.entry()];
  let ops: Vec<Op> = b0.values.iter().map(|&v| f[v].op).collect();
  assert_eq!(ops, [Op::Arg, Op::Drop]);
}

#[test]
fn conditional_ownership() {
  // Ownership of x transfers inside the "then" branch only; a synthetic
  // else block drops x on the path where the call did not happen.
  let src = "\
fun drop_it(p *int) {\n\
}\n\
fun f(b bool, x *int) {\n\
  if b {\n\
    drop_it(x)\n\
  }\n\
}\n";
  let (_comp, _units, ir) = compile(src);
  let f = fun(&ir[0], "f");

  // entry ends in a switch on the bool argument
  let switch_b = f.order.iter().copied()
    .find(|&b| f[b].kind == BlockKind::Switch)
    .expect("missing switch block");
  let control = f[switch_b].control.unwrap();
  assert_eq!(f[control].op, Op::Arg);

  // then-branch calls, the synthetic else drops x
  let succs: Vec<_> = f[switch_b].succs.iter().flatten().copied().collect();
  assert_eq!(succs.len(), 2);
  let then_b = succs[1]; // switch control -> [else, then]
  let else_b = succs[0];
  assert!(f[then_b].values.iter().any(|&v| f[v].op == Op::Call),
    "then branch should contain the call");
  let arg_x = f[f.entry()].values.iter().copied()
    .find(|&v| f[v].op == Op::Arg && matches!(
      _comp_types_is_ptr(&_comp, f, v), true))
    .unwrap();
  let drops: Vec<_> = f[else_b].values.iter().copied()
    .filter(|&v| f[v].op == Op::Drop)
    .collect();
  assert_eq!(drops.len(), 1, "synthetic else should drop x");
  assert_eq!(f[drops[0]].args.as_slice(), &[arg_x]);

  // both join at a continuation block
  assert_eq!(f[then_b].succs[0], f[else_b].succs[0]);
}

fn _comp_types_is_ptr(comp: &Compiler, f: &IrFun, v: ValId) -> bool {
  matches!(comp.types.data(f[v].ty), Type::Ptr(_))
}

#[test]
fn both_branches_consume() {
  // when both branches consume x, no extra drop is inserted anywhere
  let src = "\
fun eat(p *int) {\n\
}\n\
fun f(b bool, x *int) {\n\
  if b {\n\
    eat(x)\n\
  } else {\n\
    eat(x)\n\
  }\n\
}\n";
  let (_comp, _units, ir) = compile(src);
  let f = fun(&ir[0], "f");
  assert_eq!(find_op(f, Op::Drop).len(), 0, "no drop needed:\n{:?}", ops_of(f));
}

#[test]
fn use_after_move_is_an_error() {
  let comp = Compiler::new_for_tests();
  let msgs: Arc<std::sync::Mutex<Vec<String>>> = Arc::default();
  let m2 = msgs.clone();
  comp.diag.set_handler(Box::new(move |d| m2.lock().unwrap().push(d.msg_short.clone())));
  let pkg = Arc::new(Pkg::new("/t/main".into(), "main".into(), "/t".into()));
  let src = "fun f(x *int) {\n  var y = x\n  var z = x\n}\n";
  let file = SrcFile::new("main.co", src.as_bytes().to_vec());
  let mut units = vec![comp.parse_unit(file)];
  let _ = comp.compile_pkg_units(&pkg, &mut units);
  assert!(comp.errcount() >= 1);
  let all = msgs.lock().unwrap().join("\n");
  assert!(all.contains("use of dead value"), "{all}");
  assert!(all.contains("moved here"), "{all}");
}

#[test]
fn use_of_uninitialized_owner_is_an_error() {
  let comp = Compiler::new_for_tests();
  let msgs: Arc<std::sync::Mutex<Vec<String>>> = Arc::default();
  let m2 = msgs.clone();
  comp.diag.set_handler(Box::new(move |d| m2.lock().unwrap().push(d.msg_short.clone())));
  let pkg = Arc::new(Pkg::new("/t/main".into(), "main".into(), "/t".into()));
  let src = "fun eat(p *int) {\n}\nfun f() {\n  var x *int\n  eat(x)\n}\n";
  let file = SrcFile::new("main.co", src.as_bytes().to_vec());
  let mut units = vec![comp.parse_unit(file)];
  let _ = comp.compile_pkg_units(&pkg, &mut units);
  assert!(comp.errcount() >= 1);
  let all = msgs.lock().unwrap().join("\n");
  assert!(all.contains("use of uninitialized"), "{all}");
}

#[test]
fn reassignment_drops_previous_value() {
  // assigning over a live owner replaces it in the owners scope and the
  // old value is marked dead; the new value is dropped at scope exit
  let src = "fun f(a *int, b *int) {\n  var x = a\n  x = b\n}\n";
  let (_comp, _units, ir) = compile(src);
  let f = fun(&ir[0], "f");
  let ops = ops_of(f);
  // two moves (a into x, b into x) and a single final drop
  let nmoves = ops.iter().filter(|&&o| o == Op::Move).count();
  let ndrops = ops.iter().filter(|&&o| o == Op::Drop).count();
  assert!(nmoves >= 1, "{ops:?}");
  assert_eq!(ndrops, 1, "only the final owner is dropped at exit: {ops:?}");
}

#[test]
fn returned_owner_is_not_dropped() {
  let src = "fun f(x *int) *int {\n  return x\n}\n";
  let (_comp, _units, ir) = compile(src);
  let f = fun(&ir[0], "f");
  assert_eq!(find_op(f, Op::Drop).len(), 0, "returned value must not be dropped");
  let b = f.order.iter().copied().find(|&b| f[b].kind == BlockKind::Ret).unwrap();
  assert!(f[b].control.is_some());
}
