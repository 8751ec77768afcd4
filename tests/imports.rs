//! Package index and import resolution tests against real directories.

use std::sync::Arc;
use compis::{Compiler, CompilerConfig, ErrorKind};
use compis::loc::SrcFile;
use compis::pkg::{self, Pkg};

fn write_pkg(dir: &std::path::Path, name: &str) {
  std::fs::create_dir_all(dir).unwrap();
  std::fs::write(dir.join("lib.co"), format!("pub fun {name}() {{\n}}\n")).unwrap();
}

#[test]
fn imports_resolved_in_sorted_fspath_order() {
  // For a unit importing "b/a", "a/b" and "./x", resolution order is the
  // sorted order of their cleaned filesystem paths (the relative import
  // resolves to an absolute path, sorting first).
  let tmp = tempfile::tempdir().unwrap();
  let root = tmp.path();
  write_pkg(&root.join("b/a"), "ba");
  write_pkg(&root.join("a/b"), "ab");
  write_pkg(&root.join("main/x"), "x");
  write_pkg(&root.join("main"), "main");

  let comp = Compiler::new(CompilerConfig {
    coroot: root.to_path_buf(),
    copath: vec![root.to_path_buf()],
    ..CompilerConfig::default()
  });
  comp.diag.set_handler(Box::new(|_| {}));

  let main_dir = root.join("main").to_string_lossy().into_owned();
  let importer = comp.pkgindex_intern(&main_dir, "main", None).unwrap();

  let src = "import \"b/a\" as ba\nimport \"a/b\" as ab\nimport \"./x\" as x\nfun main() {\n}\n";
  let file = SrcFile::new(
    root.join("main/main.co").to_string_lossy().into_owned(),
    src.as_bytes().to_vec());
  let mut units = vec![comp.parse_unit(file)];

  pkg::import_pkgs(&comp, &importer, &mut units).unwrap();
  assert_eq!(comp.errcount(), 0);

  let order: Vec<String> = importer.imports.read().unwrap()
    .iter().map(|p| p.path.clone()).collect();
  // "<root>/main/x" (absolute) sorts before the symbolic "a/b" and "b/a"
  assert_eq!(order, ["main/x", "a/b", "b/a"]);
}

#[test]
fn duplicate_imports_share_one_pkg() {
  let tmp = tempfile::tempdir().unwrap();
  let root = tmp.path();
  write_pkg(&root.join("dep"), "dep");
  write_pkg(&root.join("main"), "main");

  let comp = Compiler::new(CompilerConfig {
    coroot: root.to_path_buf(),
    copath: vec![root.to_path_buf()],
    ..CompilerConfig::default()
  });
  comp.diag.set_handler(Box::new(|_| {}));

  let main_dir = root.join("main").to_string_lossy().into_owned();
  let importer = comp.pkgindex_intern(&main_dir, "main", None).unwrap();

  // the same package imported from two units
  let mk_unit = |name: &str| {
    let file = SrcFile::new(
      root.join("main").join(name).to_string_lossy().into_owned(),
      b"import \"dep\" as dep\n".to_vec());
    comp.parse_unit(file)
  };
  let mut units = vec![mk_unit("a.co"), mk_unit("b.co")];
  pkg::import_pkgs(&comp, &importer, &mut units).unwrap();

  assert_eq!(importer.imports.read().unwrap().len(), 1);

  // both Import nodes point at the same Pkg
  let mut pkgs: Vec<Arc<Pkg>> = Vec::new();
  for unit in &units {
    for id in unit.imports() {
      let compis::types::ast::NodeKind::Import { pkg: Some(p), .. } = &unit.ast[id].kind
      else { panic!("unresolved import") };
      pkgs.push(p.clone());
    }
  }
  assert_eq!(pkgs.len(), 2);
  assert!(Arc::ptr_eq(&pkgs[0], &pkgs[1]));
}

#[test]
fn missing_package_reports_not_found() {
  let tmp = tempfile::tempdir().unwrap();
  let root = tmp.path();
  write_pkg(&root.join("main"), "main");

  let comp = Compiler::new(CompilerConfig {
    coroot: root.to_path_buf(),
    copath: vec![root.to_path_buf()],
    ..CompilerConfig::default()
  });
  let msgs: Arc<std::sync::Mutex<Vec<String>>> = Arc::default();
  let m2 = msgs.clone();
  comp.diag.set_handler(Box::new(move |d| m2.lock().unwrap().push(d.msg_short.clone())));

  let main_dir = root.join("main").to_string_lossy().into_owned();
  let importer = comp.pkgindex_intern(&main_dir, "main", None).unwrap();

  let file = SrcFile::new(
    root.join("main/main.co").to_string_lossy().into_owned(),
    b"import \"no/such/pkg\"\n".to_vec());
  let mut units = vec![comp.parse_unit(file)];
  let err = pkg::import_pkgs(&comp, &importer, &mut units);
  assert_eq!(err, Err(ErrorKind::NotFound));
  let all = msgs.lock().unwrap().join("\n");
  assert!(all.contains("package \"no/such/pkg\" not found"), "{all}");
}

#[test]
fn self_import_is_cyclic() {
  let tmp = tempfile::tempdir().unwrap();
  let root = tmp.path();
  write_pkg(&root.join("main"), "main");

  let comp = Compiler::new(CompilerConfig {
    coroot: root.to_path_buf(),
    copath: vec![root.to_path_buf()],
    ..CompilerConfig::default()
  });
  let msgs: Arc<std::sync::Mutex<Vec<String>>> = Arc::default();
  let m2 = msgs.clone();
  comp.diag.set_handler(Box::new(move |d| m2.lock().unwrap().push(d.msg_short.clone())));

  let main_dir = root.join("main").to_string_lossy().into_owned();
  let importer = comp.pkgindex_intern(&main_dir, "main", None).unwrap();

  let file = SrcFile::new(
    root.join("main/main.co").to_string_lossy().into_owned(),
    b"import \"main\"\n".to_vec());
  let mut units = vec![comp.parse_unit(file)];
  let err = pkg::import_pkgs(&comp, &importer, &mut units);
  assert_eq!(err, Err(ErrorKind::Invalid));
  let all = msgs.lock().unwrap().join("\n");
  assert!(all.contains("imports itself"), "{all}");
}

#[test]
fn load_pkg_loads_dependencies_once() {
  let tmp = tempfile::tempdir().unwrap();
  let root = tmp.path();
  std::fs::create_dir_all(root.join("dep")).unwrap();
  std::fs::write(root.join("dep/lib.co"),
    "pub type Thing { v int }\npub fun make() int {\n  return 1\n}\n").unwrap();
  std::fs::create_dir_all(root.join("app")).unwrap();
  std::fs::write(root.join("app/main.co"),
    "import \"dep\" as dep\nfun main() {\n  dep.make()\n}\n").unwrap();

  let comp = Compiler::new(CompilerConfig {
    coroot: root.to_path_buf(),
    copath: vec![root.to_path_buf()],
    ..CompilerConfig::default()
  });
  comp.diag.set_handler(Box::new(|d| panic!("unexpected diagnostic: {}", d.msg)));

  let app_dir = root.join("app").to_string_lossy().into_owned();
  let app = comp.pkgindex_intern(&app_dir, "app", None).unwrap();
  comp.load_pkg(&app).unwrap();

  // the dependency was loaded and its definitions are visible
  let dep = comp.pkgindex_get(&root.join("dep").to_string_lossy()).unwrap();
  assert_eq!(dep.loadfut.try_wait(), Some(Ok(())));
  assert!(dep.def_get(comp.syms.intern("make")).is_some());

  // loading again is a no-op resolved through the future
  comp.load_pkg(&app).unwrap();
}

#[test]
fn load_pkg_concurrent_single_producer() {
  let tmp = tempfile::tempdir().unwrap();
  let root = tmp.path();
  std::fs::create_dir_all(root.join("p")).unwrap();
  std::fs::write(root.join("p/lib.co"), "pub fun f() int {\n  return 1\n}\n").unwrap();

  let comp = Compiler::new(CompilerConfig {
    coroot: root.to_path_buf(),
    copath: vec![root.to_path_buf()],
    ..CompilerConfig::default()
  });
  comp.diag.set_handler(Box::new(|_| {}));
  let pkg = comp.pkgindex_intern(&root.join("p").to_string_lossy(), "p", None).unwrap();

  std::thread::scope(|s| {
    let mut handles = vec![];
    for _ in 0..4 {
      let comp = &comp;
      let pkg = pkg.clone();
      handles.push(s.spawn(move || comp.load_pkg(&pkg)));
    }
    for h in handles {
      assert_eq!(h.join().unwrap(), Ok(()));
    }
  });
  assert_eq!(comp.errcount(), 0);
}

#[test]
fn cyclic_package_chain_is_diagnosed() {
  let tmp = tempfile::tempdir().unwrap();
  let root = tmp.path();
  std::fs::create_dir_all(root.join("a")).unwrap();
  std::fs::write(root.join("a/lib.co"), "import \"b\" as b\npub fun fa() {\n}\n").unwrap();
  std::fs::create_dir_all(root.join("b")).unwrap();
  std::fs::write(root.join("b/lib.co"), "import \"a\" as a\npub fun fb() {\n}\n").unwrap();

  let comp = Compiler::new(CompilerConfig {
    coroot: root.to_path_buf(),
    copath: vec![root.to_path_buf()],
    ..CompilerConfig::default()
  });
  let msgs: Arc<std::sync::Mutex<Vec<String>>> = Arc::default();
  let m2 = msgs.clone();
  comp.diag.set_handler(Box::new(move |d| m2.lock().unwrap().push(d.msg_short.clone())));

  let a = comp.pkgindex_intern(&root.join("a").to_string_lossy(), "a", None).unwrap();
  assert!(comp.load_pkg(&a).is_err());
  let all = msgs.lock().unwrap().join("\n");
  assert!(all.contains("cyclic package dependency"), "{all}");
}

#[test]
fn pkgs_for_args_builds_adhoc_and_dir_packages() {
  let tmp = tempfile::tempdir().unwrap();
  let root = tmp.path();
  write_pkg(&root.join("dirpkg"), "d");
  std::fs::write(root.join("single.co"), "fun main() {\n}\n").unwrap();

  let comp = Compiler::new(CompilerConfig::default());
  comp.diag.set_handler(Box::new(|_| {}));

  let dir_arg = root.join("dirpkg").to_string_lossy().into_owned();
  let file_arg = root.join("single.co").to_string_lossy().into_owned();
  let pkgs = pkg::pkgs_for_args(&comp, &[dir_arg.as_str(), file_arg.as_str()]).unwrap();
  assert_eq!(pkgs.len(), 2);
  assert_eq!(pkgs[0].srcfiles.read().unwrap().len(), 1);
  assert_eq!(pkgs[1].srcfiles.read().unwrap().len(), 1);
}
