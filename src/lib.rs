//! The Compis language front-end: scanner, parser, type checker and
//! ownership-annotating SSA IR builder.
//!
//! The pipeline transforms source text into a validated, ownership-annotated
//! IR unit ready for C code generation:
//!
//! ```text
//! bytes → Scanner → Parser → import resolution → typecheck →
//!   type-dependency check → IR build (MOVE/DROP insertion) → IrUnit
//! ```
//!
//! Shared state (symbol interner, location map, type store, package index,
//! diagnostics) lives in a [`Compiler`] which can be shared across worker
//! threads; see the individual modules for the locking discipline.

pub mod symbol;
pub mod loc;
pub mod diag;
pub mod token;
pub mod scanner;
pub mod scope;
pub mod parser;
pub mod future;
pub mod pkg;
pub mod types;
pub mod infer;
pub mod typedeps;
pub mod build_ir;
pub mod irfmt;

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use hashbrown::HashMap;
use thiserror::Error;

use crate::diag::Diagnostics;
use crate::loc::{LocMap, SrcFile};
use crate::pkg::Pkg;
use crate::symbol::Interner;
use crate::types::TypeStore;
use crate::types::ast::Unit;
use crate::types::ir::IrUnit;

/// Identifier prefix reserved for the compiler; using it in source is an
/// error. It is also the mangled-name prefix emitted for codegen.
pub const ABI_GLOBAL_PREFIX: &str = "__co_";
/// Mangling prefix for Compis identifiers.
pub const MANGLE_PREFIX: &str = "_co";

/// Error kinds propagated by fallible compiler operations. Syntax and type
/// errors are reported through the diagnostics sink and surface here as
/// [`Invalid`](ErrorKind::Invalid).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum ErrorKind {
  #[error("invalid input")]
  Invalid,
  #[error("out of memory")]
  NoMem,
  #[error("not found")]
  NotFound,
  #[error("already exists")]
  Exists,
  #[error("I/O error")]
  Io,
  #[error("memory fault")]
  MFault,
  #[error("value too large")]
  Overflow,
  #[error("name too long")]
  NameTooLong,
  #[error("operation canceled")]
  Canceled,
  #[error("end of input")]
  End,
}

/// A newtype index. Implementors are cheap handles into arenas.
pub trait Idx: Copy + Eq {
  fn into_usize(self) -> usize;
  fn from_usize(n: usize) -> Self;
  /// Post-increment: return self and replace with the next index.
  fn fresh(&mut self) -> Self {
    let n = *self;
    *self = Self::from_usize(self.into_usize() + 1);
    n
  }
}

/// Construction-time configuration of a [`Compiler`].
#[derive(Debug, Clone)]
pub struct CompilerConfig {
  /// Install directory; `std/*` imports resolve under it.
  pub coroot: PathBuf,
  /// Search path for symbolic (non-`std`) imports.
  pub copath: Vec<PathBuf>,
  /// Target triple, e.g. "x86_64-linux".
  pub target: String,
  /// Retain comments while scanning.
  pub parse_comments: bool,
}

impl Default for CompilerConfig {
  fn default() -> Self {
    CompilerConfig {
      coroot: std::env::var_os("COROOT").map_or_else(|| PathBuf::from("."), PathBuf::from),
      copath: std::env::var_os("COPATH")
        .map(|v| std::env::split_paths(&v).collect())
        .unwrap_or_else(|| vec![PathBuf::from(".")]),
      target: String::new(),
      parse_comments: false,
    }
  }
}

/// The shared compiler context: configuration plus the process-wide
/// services (symbol interner, location map, type store, diagnostics sink
/// and package index). Safe to share across worker threads.
pub struct Compiler {
  pub config: CompilerConfig,
  pub syms: Interner,
  pub locmap: LocMap,
  pub types: TypeStore,
  pub diag: Diagnostics,
  pkgindex: RwLock<HashMap<String, Arc<Pkg>>>,
}

impl Compiler {
  #[must_use] pub fn new(config: CompilerConfig) -> Compiler {
    Compiler {
      config,
      syms: Interner::new(),
      locmap: LocMap::new(),
      types: TypeStore::new(),
      diag: Diagnostics::new(),
      pkgindex: RwLock::new(HashMap::new()),
    }
  }

  /// A compiler with default configuration and a silent-by-default setup
  /// suitable for unit tests.
  #[must_use] pub fn new_for_tests() -> Compiler {
    Compiler::new(CompilerConfig::default())
  }

  /// Number of errors reported so far.
  #[must_use] pub fn errcount(&self) -> u32 { self.diag.errcount() }

  /// True when no errors have been reported; passes consult this and skip
  /// work after errors.
  #[must_use] pub fn ok(&self) -> bool { self.diag.ok() }

  /// Look up or create the package for `dir` (absolute, cleaned).
  /// Two calls with the same directory return the same `Pkg`.
  pub fn pkgindex_intern(
    &self,
    dir: &str,
    path: &str,
    api_sha256: Option<[u8; 32]>,
  ) -> Result<Arc<Pkg>, ErrorKind> {
    let dir = pkg::clean_path(dir);
    if let Some(pkg) = self.pkgindex.read().unwrap().get(&dir) {
      if let Some(sha) = api_sha256 {
        if pkg.api_sha256() == [0; 32] {
          pkg.set_api_sha256_raw(sha);
        }
      }
      return Ok(pkg.clone());
    }
    let mut index = self.pkgindex.write().unwrap();
    if let Some(pkg) = index.get(&dir) {
      return Ok(pkg.clone());
    }
    let root = match dir.strip_suffix(path).and_then(|p| p.strip_suffix('/')) {
      Some(r) => r.to_string(),
      None => dir.rsplit_once('/').map_or(String::new(), |(r, _)| r.to_string()),
    };
    let pkgpath = if dir.len() > root.len() { dir[root.len() + 1..].to_string() }
      else { path.to_string() };
    let pkg = Arc::new(Pkg::new(dir.clone(), pkgpath, root));
    if let Some(sha) = api_sha256 {
      pkg.set_api_sha256_raw(sha);
    }
    index.insert(dir, pkg.clone());
    Ok(pkg)
  }

  /// Insert a pre-built package. Returns [`ErrorKind::Exists`] (benign) if
  /// its directory is already indexed; the caller should use the existing
  /// package.
  pub fn pkgindex_add(&self, pkg: Arc<Pkg>) -> Result<(), ErrorKind> {
    let mut index = self.pkgindex.write().unwrap();
    if index.contains_key(&pkg.dir) {
      return Err(ErrorKind::Exists);
    }
    index.insert(pkg.dir.clone(), pkg);
    Ok(())
  }

  #[must_use] pub fn pkgindex_get(&self, dir: &str) -> Option<Arc<Pkg>> {
    self.pkgindex.read().unwrap().get(dir).cloned()
  }

  /// Parse a single source file into a unit.
  #[must_use] pub fn parse_unit(&self, srcfile: Arc<SrcFile>) -> Unit {
    parser::Parser::new(self, srcfile).parse_unit()
  }

  /// Load a package: parse its source files, resolve imports, load the
  /// imported packages, and typecheck. No matter how many threads ask, the
  /// work happens once: the first caller acquires the package's load
  /// future and produces; the others block until it is finalized.
  ///
  /// Populates `pkg.defs` and the type-function table as a side effect,
  /// which is what importers need.
  pub fn load_pkg(&self, pkg: &Arc<Pkg>) -> Result<(), ErrorKind> {
    let mut stack = Vec::new();
    self.load_pkg_guarded(pkg, &mut stack)
  }

  fn load_pkg_guarded(
    &self,
    pkg: &Arc<Pkg>,
    stack: &mut Vec<String>,
  ) -> Result<(), ErrorKind> {
    if stack.contains(&pkg.dir) {
      let origin = crate::loc::Origin::default();
      self.diag.report(origin, diag::DiagKind::Error,
        format!("cyclic package dependency involving \"{}\"", pkg.path));
      return Err(ErrorKind::Invalid);
    }
    if pkg.loadfut.acquire() {
      stack.push(pkg.dir.clone());
      let result = self.load_pkg_produce(pkg, stack);
      stack.pop();
      pkg.loadfut.finalize(result);
      result
    } else {
      // another thread is (or was) producing; wait for the stored result
      pkg.loadfut.wait()
    }
  }

  fn load_pkg_produce(
    &self,
    pkg: &Arc<Pkg>,
    stack: &mut Vec<String>,
  ) -> Result<(), ErrorKind> {
    if pkg.srcfiles.read().unwrap().is_empty() {
      pkg.find_files()?;
    }
    let files: Vec<Arc<SrcFile>> = pkg.srcfiles.read().unwrap().clone();
    let mut units: Vec<Unit> = files.into_iter().map(|f| self.parse_unit(f)).collect();
    if !self.ok() {
      return Err(ErrorKind::Invalid);
    }
    pkg::import_pkgs(self, pkg, &mut units)?;
    // the definitions of imported packages must exist before typecheck
    let deps: Vec<Arc<Pkg>> = pkg.imports.read().unwrap().clone();
    for dep in deps {
      self.load_pkg_guarded(&dep, stack)?;
    }
    infer::typecheck_pkg(self, pkg, &mut units)?;
    typedeps::check_typedeps(self, &units)?;
    Ok(())
  }

  /// Run the whole front-end over a package's units:
  /// import resolution, typecheck, type-dependency verification and IR
  /// construction. Skips later passes once an error has been reported.
  pub fn compile_pkg_units(
    &self,
    pkg: &Arc<Pkg>,
    units: &mut [Unit],
  ) -> Result<Vec<IrUnit>, ErrorKind> {
    pkg::import_pkgs(self, pkg, units)?;
    if !self.ok() {
      return Err(ErrorKind::Invalid);
    }
    infer::typecheck_pkg(self, pkg, units)?;
    if !self.ok() {
      return Err(ErrorKind::Invalid);
    }
    typedeps::check_typedeps(self, units)?;
    if !self.ok() {
      return Err(ErrorKind::Invalid);
    }
    let mut irunits = Vec::with_capacity(units.len());
    for unit in units.iter_mut() {
      irunits.push(build_ir::analyze(self, unit)?);
      if !self.ok() {
        return Err(ErrorKind::Invalid);
      }
    }
    Ok(irunits)
  }
}
