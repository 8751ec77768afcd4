//! Packages, the package index and import resolution.
//!
//! A [`Pkg`] is interned by its canonical absolute directory: two references
//! to the same directory always point to the same `Pkg`. Import paths are
//! validated and lexically cleaned, then resolved against the importing
//! file's directory (relative imports), `coroot` (`std/` imports) or the
//! `copath` search list. Imports across a package's units are deduplicated
//! and resolved in sorted order, which makes resolution deterministic.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use hashbrown::HashMap;
use sha2::{Digest, Sha256};
use crate::{Compiler, ErrorKind};
use crate::diag::DiagKind;
use crate::future::LoadFut;
use crate::loc::{Loc, Origin, SrcFile};
use crate::symbol::Symbol;
use crate::types::TypeFunTab;
use crate::types::ast::{NodeId, NodeKind, Unit, Vis};
use crate::types::Ty;

/// Name of the on-disk package metadata file. Part of the package cache
/// contract; changing it invalidates every cache.
pub const PKG_METAFILE_NAME: &str = "pub.coast";
/// Name of the generated public API header. Same contract as
/// [`PKG_METAFILE_NAME`].
pub const PKG_APIHFILE_NAME: &str = "pub.h";

/// A package-level definition: which unit and node it lives at.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Def {
  pub unit: u32,
  pub node: NodeId,
}

/// A definition together with its resolved type, visibility and location.
#[derive(Debug, Copy, Clone)]
pub struct DefEnt {
  pub def: Def,
  pub ty: Ty,
  pub loc: Loc,
  pub vis: Vis,
}

/// A package.
pub struct Pkg {
  /// Import path, e.g. "main" or "std/runtime" (canonical).
  pub path: String,
  /// Absolute path to the source directory (canonical, cleaned).
  pub dir: String,
  /// Directory above the package's top path segment: root + "/" + path == dir.
  pub root: String,
  /// Single-file package created from a file CLI argument.
  pub is_adhoc: bool,

  pub srcfiles: RwLock<Vec<Arc<SrcFile>>>,
  pub defs: RwLock<HashMap<Symbol, DefEnt>>,
  pub tfundefs: TypeFunTab,
  pub imports: RwLock<Vec<Arc<Pkg>>>,
  pub loadfut: LoadFut,
  pub mainfun: Mutex<Option<Def>>,
  api_sha256: Mutex<[u8; 32]>,
}

impl std::fmt::Debug for Pkg {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Pkg")
      .field("path", &self.path)
      .field("dir", &self.dir)
      .field("root", &self.root)
      .finish_non_exhaustive()
  }
}

impl Pkg {
  #[must_use] pub fn new(dir: String, path: String, root: String) -> Pkg {
    debug_assert!(Path::new(&dir).is_absolute(), "pkg dir must be absolute: {dir}");
    Pkg {
      path,
      dir,
      root,
      is_adhoc: false,
      srcfiles: RwLock::new(Vec::new()),
      defs: RwLock::new(HashMap::new()),
      tfundefs: TypeFunTab::new(),
      imports: RwLock::new(Vec::new()),
      loadfut: LoadFut::new(),
      mainfun: Mutex::new(None),
      api_sha256: Mutex::new([0; 32]),
    }
  }

  /// Add a source file, keeping the list uniquely sorted by name.
  /// Returns false if a file with the same name is already present.
  pub fn add_srcfile(&self, f: Arc<SrcFile>) -> bool {
    let mut files = self.srcfiles.write().unwrap();
    match files.binary_search_by(|x| x.name.cmp(&f.name)) {
      Ok(_) => false,
      Err(i) => {
        files.insert(i, f);
        true
      }
    }
  }

  /// Find `*.co` files in the package directory, sorted by name.
  pub fn find_files(&self) -> Result<(), ErrorKind> {
    let entries = std::fs::read_dir(&self.dir).map_err(|_| ErrorKind::NotFound)?;
    let mut names: Vec<PathBuf> = entries
      .filter_map(Result::ok)
      .map(|e| e.path())
      .filter(|p| p.extension().is_some_and(|e| e == "co"))
      .collect();
    names.sort();
    for p in names {
      let data = std::fs::read(&p).map_err(|_| ErrorKind::Io)?;
      let mtime = std::fs::metadata(&p).ok().and_then(|m| m.modified().ok());
      let mut sf = SrcFile::new(p.to_string_lossy().into_owned(), data);
      Arc::get_mut(&mut sf).unwrap().mtime = mtime;
      self.add_srcfile(sf);
    }
    Ok(())
  }

  #[must_use] pub fn def_get(&self, name: Symbol) -> Option<DefEnt> {
    self.defs.read().unwrap().get(&name).copied()
  }

  /// Insert a definition. On name collision the existing entry is returned
  /// as the error so the caller can point at the previous definition.
  pub fn def_add(&self, name: Symbol, ent: DefEnt) -> Result<(), DefEnt> {
    match self.defs.write().unwrap().entry(name) {
      hashbrown::hash_map::Entry::Occupied(e) => Err(*e.get()),
      hashbrown::hash_map::Entry::Vacant(e) => {
        e.insert(ent);
        Ok(())
      }
    }
  }

  /// Insert or replace a definition.
  pub fn def_set(&self, name: Symbol, ent: DefEnt) {
    self.defs.write().unwrap().insert(name, ent);
  }

  /// Record `dep` as an imported package, uniquely.
  pub fn imports_add(&self, dep: &Arc<Pkg>) {
    let mut imports = self.imports.write().unwrap();
    if !imports.iter().any(|p| p.dir == dep.dir) {
      imports.push(dep.clone());
    }
  }

  /// Set the package API digest from the contents of its `pub.h`.
  pub fn set_api_sha256(&self, api_bytes: &[u8]) {
    let digest = Sha256::digest(api_bytes);
    self.api_sha256.lock().unwrap().copy_from_slice(&digest);
  }

  pub fn set_api_sha256_raw(&self, digest: [u8; 32]) {
    *self.api_sha256.lock().unwrap() = digest;
  }

  #[must_use] pub fn api_sha256(&self) -> [u8; 32] {
    *self.api_sha256.lock().unwrap()
  }

  /// Hex rendering of the API digest, used as a cache key.
  #[must_use] pub fn api_sha256_hex(&self) -> String {
    hex::encode(self.api_sha256())
  }

  /// The absolute directory of the unit's source file.
  #[must_use] pub fn unit_srcdir(&self, unit: &Unit) -> String {
    let p = Path::new(&unit.srcfile.name);
    let dir = p.parent().filter(|d| !d.as_os_str().is_empty());
    match dir {
      Some(d) if d.is_absolute() => d.to_string_lossy().into_owned(),
      Some(d) => clean_path(&format!("{}/{}", self.dir, d.to_string_lossy())),
      None => self.dir.clone(),
    }
  }
}

//———————————————————————————————————————————————————————————————————————————
// path helpers

/// Lexically clean a path: resolve "." and ".." segments and collapse
/// repeated separators. Does not touch the filesystem.
#[must_use] pub fn clean_path(path: &str) -> String {
  let absolute = path.starts_with('/');
  let mut out: Vec<&str> = Vec::new();
  for seg in path.split('/') {
    match seg {
      "" | "." => {}
      ".." => {
        match out.last() {
          Some(&s) if s != ".." => { out.pop(); }
          _ if absolute => {}
          _ => out.push(".."),
        }
      }
      s => out.push(s),
    }
  }
  let joined = out.join("/");
  if absolute {
    format!("/{joined}")
  } else if joined.is_empty() {
    ".".into()
  } else {
    joined
  }
}

fn path_is_rooted(path: &str, root: &str) -> bool {
  path == root
    || (path.starts_with(root) && path.as_bytes().get(root.len()) == Some(&b'/'))
}

//———————————————————————————————————————————————————————————————————————————
// import path validation & resolution

/// Validate a source-level import path. On error, returns the message and
/// the byte offset of the offending character.
pub fn validate_import_path(path: &str) -> Result<(), (&'static str, usize)> {
  let b = path.as_bytes();
  if b.is_empty() {
    return Err(("empty path", 0));
  }
  if b[0] == b' ' {
    return Err(("leading whitespace", 0));
  }
  if b[0] == b'/' {
    return Err(("absolute path", 0));
  }

  // if path starts with "." it must be "./" or "../"
  if b[0] == b'.' && b.get(1) != Some(&b'/') && !(b.get(1) == Some(&b'.') && b.get(2) == Some(&b'/')) {
    if b.len() == 1 {
      return Err(("cannot import itself", 0));
    }
    return Err(("must start with \"./\" or \"../\" when first character is '.'", 1));
  }

  // invalid or reserved characters
  for (i, &c) in b.iter().enumerate() {
    if c <= b' ' || c == b':' || c == b'\\' || c == b'@' {
      if c == b' ' {
        // space is permitted anywhere but at the beginning or end
        if i + 1 < b.len() {
          continue;
        }
        return Err(("trailing whitespace", i));
      }
      return Err((match c {
        b'@' => "'@' is a reserved character",
        b'\\' => "use '/' as path separator, not '\\'",
        _ => "invalid character",
      }, i));
    }
  }

  // symbolic paths must not contain parent-directory references
  if b[0] != b'.' {
    if let Some(i) = path.find("/../") {
      return Err(("parent-directory reference", i + 1));
    }
    if path.ends_with("/..") {
      return Err(("parent-directory reference", path.len() - 2));
    }
  }

  Ok(())
}

/// Resolve a source-level import path against the importing unit.
/// Returns `(symbolic_path, fspath)` where `fspath` is either absolute
/// (relative import, resolved against `importer_fsdir`) or symbolic
/// (to be located via `coroot`/`copath`).
pub fn import_clean_path(
  importer_pkg: &Pkg,
  importer_fsdir: &str,
  path: &str,
) -> Result<(String, String), ErrorKind> {
  debug_assert!(!path.is_empty() && !path.starts_with('/'));
  debug_assert!(Path::new(importer_fsdir).is_absolute());

  // symbolic path, e.g. "foo/bar": resolved later by searching copath
  if !path.starts_with('.') {
    return Ok((path.to_string(), clean_path(path)));
  }

  // relative import is relative to the importing srcfile's directory
  let fspath = clean_path(&format!("{importer_fsdir}/{path}"));

  // reject paths that escape the package root
  if !path_is_rooted(&fspath, &importer_pkg.root) {
    return Err(ErrorKind::Invalid);
  }

  // the root-relative subpath becomes the symbolic package path
  let sympath = fspath[importer_pkg.root.len() + 1..].to_string();
  Ok((sympath, fspath))
}

/// Locate the directory of an import whose `fspath` is either absolute or
/// symbolic. Returns the absolute directory and the length of its root
/// prefix.
pub fn resolve_import_fspath(
  comp: &Compiler,
  fspath: &str,
) -> Result<(String, usize), ErrorKind> {
  debug_assert!(!fspath.starts_with('.'));

  if fspath.starts_with('/') {
    if !Path::new(fspath).is_dir() {
      return Err(ErrorKind::NotFound);
    }
    let rootlen = fspath.rfind('/').unwrap_or(0);
    return Ok((fspath.to_string(), rootlen));
  }

  // special "std/" prefix resolves under coroot
  if fspath.starts_with("std/") {
    let coroot = comp.config.coroot.to_string_lossy();
    let dir = clean_path(&format!("{coroot}/{fspath}"));
    if !Path::new(&dir).is_dir() {
      return Err(ErrorKind::NotFound);
    }
    let rootlen = dir.len() - fspath.len() - 1;
    return Ok((dir, rootlen));
  }

  // search copath entries in order
  for entry in &comp.config.copath {
    let joined = clean_path(&format!("{}/{fspath}", entry.to_string_lossy()));
    let joined = if Path::new(&joined).is_absolute() {
      joined
    } else {
      let cwd = std::env::current_dir().map_err(|_| ErrorKind::Io)?;
      clean_path(&format!("{}/{joined}", cwd.to_string_lossy()))
    };
    if Path::new(&joined).is_dir() {
      let rootlen = joined.len() - fspath.len() - 1;
      return Ok((joined, rootlen));
    }
  }
  Err(ErrorKind::NotFound)
}

/// Resolve all imports of a package's units.
///
/// Imports are first deduplicated by their cleaned filesystem path, then
/// resolved in sorted order (so resolution order does not depend on source
/// declaration order). All duplicates point to the same resolved `Pkg`.
pub fn import_pkgs(
  comp: &Compiler,
  importer_pkg: &Arc<Pkg>,
  units: &mut [Unit],
) -> Result<(), ErrorKind> {
  struct Imp {
    path: String,
    sites: Vec<(usize, NodeId)>, // (unit index, Import node)
  }
  // BTreeMap keyed by cleaned fspath: deduplicated and sorted
  let mut unique: BTreeMap<String, Imp> = BTreeMap::new();

  for (ui, unit) in units.iter().enumerate() {
    let importer_dir = importer_pkg.unit_srcdir(unit);
    let imports: Vec<NodeId> = unit.imports().collect();
    for id in imports {
      let NodeKind::Import { path, pathloc, .. } = &unit.ast[id].kind else {
        unreachable!();
      };
      let pathloc = *pathloc;
      if let Err((msg, _off)) = validate_import_path(path) {
        let origin = Origin::of_loc(&comp.locmap, pathloc);
        comp.diag.report(origin, DiagKind::Error,
          format!("invalid import path: {msg}"));
        continue;
      }
      match import_clean_path(importer_pkg, &importer_dir, path) {
        Ok((sympath, fspath)) => {
          unique.entry(fspath)
            .or_insert_with(|| Imp { path: sympath, sites: Vec::new() })
            .sites.push((ui, id));
        }
        Err(_) => {
          let origin = Origin::of_loc(&comp.locmap, pathloc);
          comp.diag.report(origin, DiagKind::Error, format!(
            "import path \"{path}\" escapes package root \"{}\"",
            importer_pkg.root));
        }
      }
    }
  }

  let mut err = None;
  for (fspath, imp) in unique {
    let site_origin = |comp: &Compiler, units: &[Unit]| {
      let &(ui, id) = &imp.sites[0];
      let NodeKind::Import { pathloc, .. } = &units[ui].ast[id].kind else {
        unreachable!();
      };
      Origin::of_loc(&comp.locmap, *pathloc)
    };

    let pkg = match resolve_import_fspath(comp, &fspath) {
      Ok((dir, _rootlen)) => {
        match comp.pkgindex_intern(&dir, &imp.path, None) {
          Ok(pkg) => pkg,
          Err(e) => {
            err.get_or_insert(e);
            continue;
          }
        }
      }
      Err(ErrorKind::NotFound) => {
        comp.diag.report(site_origin(comp, units), DiagKind::Error,
          format!("package \"{}\" not found", imp.path));
        err.get_or_insert(ErrorKind::NotFound);
        continue;
      }
      Err(e) => return Err(e),
    };

    // cyclic import
    if Arc::ptr_eq(&pkg, importer_pkg) || pkg.dir == importer_pkg.dir {
      comp.diag.report(site_origin(comp, units), DiagKind::Error,
        format!("package \"{}\" imports itself", pkg.path));
      return Err(ErrorKind::Invalid);
    }

    importer_pkg.imports_add(&pkg);
    for (ui, id) in imp.sites {
      let NodeKind::Import { pkg: slot, .. } = &mut units[ui].ast[id].kind else {
        unreachable!();
      };
      *slot = Some(pkg.clone());
    }
  }

  match err {
    Some(e) => Err(e),
    None => Ok(()),
  }
}

/// Build packages from command-line arguments (directories or lone source
/// files; the latter become ad-hoc single-file packages).
pub fn pkgs_for_args(
  comp: &Compiler,
  args: &[&str],
) -> Result<Vec<Arc<Pkg>>, ErrorKind> {
  let mut pkgs = Vec::new();
  for &arg in args {
    let p = std::fs::canonicalize(arg).map_err(|_| ErrorKind::NotFound)?;
    let dirstr;
    let is_adhoc;
    if p.is_dir() {
      dirstr = p.to_string_lossy().into_owned();
      is_adhoc = false;
    } else {
      dirstr = p.parent()
        .map(|d| d.to_string_lossy().into_owned())
        .ok_or(ErrorKind::NotFound)?;
      is_adhoc = true;
    }
    let name = Path::new(&dirstr)
      .file_name()
      .map_or_else(|| "main".to_string(), |n| n.to_string_lossy().into_owned());
    let pkg = comp.pkgindex_intern(&dirstr, &name, None)?;
    if is_adhoc {
      let data = std::fs::read(&p).map_err(|_| ErrorKind::Io)?;
      pkg.add_srcfile(SrcFile::new(p.to_string_lossy().into_owned(), data));
    } else {
      pkg.find_files()?;
    }
    if !pkgs.iter().any(|q: &Arc<Pkg>| q.dir == pkg.dir) {
      pkgs.push(pkg);
    }
  }
  Ok(pkgs)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::CompilerConfig;

  #[test]
  fn clean_path_rules() {
    assert_eq!(clean_path("a/b/../c"), "a/c");
    assert_eq!(clean_path("./a//b/."), "a/b");
    assert_eq!(clean_path("/x/y/../../z"), "/z");
    assert_eq!(clean_path("/.."), "/");
    assert_eq!(clean_path("../a"), "../a");
    assert_eq!(clean_path("."), ".");
  }

  #[test]
  fn validate_paths() {
    assert!(validate_import_path("foo/bar").is_ok());
    assert!(validate_import_path("./foo").is_ok());
    assert!(validate_import_path("../foo").is_ok());
    assert!(validate_import_path("std/runtime").is_ok());
    assert!(validate_import_path("a b/c").is_ok());

    assert_eq!(validate_import_path(""), Err(("empty path", 0)));
    assert_eq!(validate_import_path("/abs"), Err(("absolute path", 0)));
    assert_eq!(validate_import_path(" x"), Err(("leading whitespace", 0)));
    assert_eq!(validate_import_path("x "), Err(("trailing whitespace", 1)));
    assert_eq!(validate_import_path("."), Err(("cannot import itself", 0)));
    assert!(validate_import_path(".foo").is_err());
    assert!(validate_import_path("a@b").is_err());
    assert!(validate_import_path("a\\b").is_err());
    assert!(validate_import_path("a:b").is_err());
    assert!(validate_import_path("foo/../bar").is_err());
    assert!(validate_import_path("foo/..").is_err());
    // ".." rules don't apply to relative paths
    assert!(validate_import_path("../foo/bar").is_ok());
  }

  #[test]
  fn pkgindex_interns_by_dir() {
    let dir = tempfile::tempdir().unwrap();
    let d = dir.path().join("mypkg");
    std::fs::create_dir(&d).unwrap();
    let dstr = d.to_string_lossy();

    let comp = Compiler::new_for_tests();
    let p1 = comp.pkgindex_intern(&dstr, "mypkg", None).unwrap();
    let p2 = comp.pkgindex_intern(&dstr, "mypkg", None).unwrap();
    assert!(Arc::ptr_eq(&p1, &p2));
    assert_eq!(p1.path, "mypkg");
    assert!(p1.dir.ends_with("mypkg"));
    assert_eq!(format!("{}/{}", p1.root, p1.path), p1.dir);
  }

  #[test]
  fn api_sha256_stable() {
    let pkg = Pkg::new("/x/y".into(), "y".into(), "/x".into());
    pkg.set_api_sha256(b"pub fun f()\n");
    let hexstr = pkg.api_sha256_hex();
    assert_eq!(hexstr.len(), 64);
    let pkg2 = Pkg::new("/x/z".into(), "z".into(), "/x".into());
    pkg2.set_api_sha256(b"pub fun f()\n");
    assert_eq!(hexstr, pkg2.api_sha256_hex());
  }

  #[test]
  fn import_clean_relative() {
    let pkg = Pkg::new("/src/foo/bar".into(), "foo/bar".into(), "/src".into());
    let (sym, fs) = import_clean_path(&pkg, "/src/foo/bar", "./a/b").unwrap();
    assert_eq!(fs, "/src/foo/bar/a/b");
    assert_eq!(sym, "foo/bar/a/b");

    let (sym, fs) = import_clean_path(&pkg, "/src/foo/bar", "../a").unwrap();
    assert_eq!(fs, "/src/foo/a");
    assert_eq!(sym, "foo/a");

    // escaping the root is an error
    assert!(import_clean_path(&pkg, "/src/foo/bar", "../../../zzz").is_err());

    // symbolic paths pass through
    let (sym, fs) = import_clean_path(&pkg, "/src/foo/bar", "a/b").unwrap();
    assert_eq!(sym, "a/b");
    assert_eq!(fs, "a/b");
  }

  #[test]
  fn resolve_via_copath_and_coroot() {
    let tmp = tempfile::tempdir().unwrap();
    let coroot = tmp.path().join("coroot");
    let copath1 = tmp.path().join("p1");
    std::fs::create_dir_all(coroot.join("std/runtime")).unwrap();
    std::fs::create_dir_all(copath1.join("lolcat")).unwrap();

    let comp = Compiler::new(CompilerConfig {
      coroot: coroot.clone(),
      copath: vec![copath1.clone()],
      ..CompilerConfig::default()
    });

    let (dir, rootlen) = resolve_import_fspath(&comp, "std/runtime").unwrap();
    assert!(dir.ends_with("std/runtime"));
    assert_eq!(&dir[rootlen + 1..], "std/runtime");

    let (dir, rootlen) = resolve_import_fspath(&comp, "lolcat").unwrap();
    assert!(dir.ends_with("lolcat"));
    assert_eq!(&dir[rootlen + 1..], "lolcat");

    assert_eq!(resolve_import_fspath(&comp, "nope"), Err(ErrorKind::NotFound));
  }
}
