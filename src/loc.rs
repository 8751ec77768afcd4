//! Compact source locations.
//!
//! A [`Loc`] packs file, line, column and width into 64 bits, in the manner
//! of the Go compiler's `xpos`. `Loc::default()` (all zeroes) is "unknown".

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

const WIDTH_BITS: u64 = 12;
const COL_BITS: u64 = 12;
const LINE_BITS: u64 = 20;
const FILE_BITS: u64 = 64 - LINE_BITS - COL_BITS - WIDTH_BITS;

const FILE_MAX: u64 = (1 << FILE_BITS) - 1;
const LINE_MAX: u64 = (1 << LINE_BITS) - 1;
const COL_MAX: u64 = (1 << COL_BITS) - 1;
const WIDTH_MAX: u64 = (1 << WIDTH_BITS) - 1;

const FILE_SHIFT: u64 = LINE_BITS + COL_BITS + WIDTH_BITS;
const LINE_SHIFT: u64 = COL_BITS + WIDTH_BITS;
const COL_SHIFT: u64 = WIDTH_BITS;

/// A packed source location: (file, line, col, width).
/// Limits: 1048575 files, 1048575 lines, 4095 columns, 4095 width;
/// out-of-range components saturate.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Loc(u64);

impl Loc {
  pub const UNKNOWN: Loc = Loc(0);

  #[must_use] pub fn new(file_id: u32, line: u32, col: u32, width: u32) -> Loc {
    Loc(FILE_MAX.min(file_id.into()) << FILE_SHIFT
      | LINE_MAX.min(line.into()) << LINE_SHIFT
      | COL_MAX.min(col.into()) << COL_SHIFT
      | WIDTH_MAX.min(width.into()))
  }

  #[must_use] pub fn file_id(self) -> u32 { (self.0 >> FILE_SHIFT) as u32 }
  #[must_use] pub fn line(self) -> u32 { ((self.0 >> LINE_SHIFT) & LINE_MAX) as u32 }
  #[must_use] pub fn col(self) -> u32 { ((self.0 >> COL_SHIFT) & COL_MAX) as u32 }
  #[must_use] pub fn width(self) -> u32 { (self.0 & WIDTH_MAX) as u32 }

  #[must_use] pub fn with_line(self, line: u32) -> Loc {
    Loc::new(self.file_id(), line, self.col(), self.width())
  }
  #[must_use] pub fn with_col(self, col: u32) -> Loc {
    Loc::new(self.file_id(), self.line(), col, self.width())
  }
  #[must_use] pub fn with_width(self, width: u32) -> Loc {
    Loc::new(self.file_id(), self.line(), self.col(), width)
  }

  /// True if this location carries any information.
  #[must_use] pub fn is_known(self) -> bool {
    self.file_id() != 0 || self.line() != 0
  }

  /// A location covering the column extent of both `self` and `other`.
  /// Both must be on the same line; otherwise `self` is returned unchanged.
  #[must_use] pub fn union(self, other: Loc) -> Loc {
    if other.line() != self.line() || other.file_id() != self.file_id() {
      return self;
    }
    let start = self.col().min(other.col());
    let end = (self.col() + self.width()).max(other.col() + other.width());
    Loc::new(self.file_id(), self.line(), start, end - start)
  }
}

impl fmt::Debug for Loc {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}:{}+{}", self.file_id(), self.line(), self.col(), self.width())
  }
}

/// A source file: name, contents, modification time.
/// Its id is assigned when interned into a [`LocMap`].
#[derive(Debug)]
pub struct SrcFile {
  pub name: String,
  pub data: Vec<u8>,
  pub mtime: Option<SystemTime>,
}

impl SrcFile {
  #[must_use] pub fn new(name: impl Into<String>, data: Vec<u8>) -> Arc<SrcFile> {
    Arc::new(SrcFile { name: name.into(), data, mtime: None })
  }

  /// The byte range of line `lineno` (1-based), excluding the terminator.
  #[must_use] pub fn line(&self, lineno: u32) -> Option<&[u8]> {
    if lineno == 0 { return None }
    self.data.split(|&b| b == b'\n').nth(lineno as usize - 1)
  }
}

/// Maps `Loc` file ids to source files. All operations are thread safe.
/// Slot 0 is reserved and always empty ("unknown file").
#[derive(Default)]
pub struct LocMap {
  files: RwLock<Vec<Arc<SrcFile>>>,
}

impl LocMap {
  #[must_use] pub fn new() -> LocMap { LocMap::default() }

  /// Intern a source file, returning its id (>= 1).
  /// Interning the same file twice returns the same id.
  pub fn intern(&self, file: &Arc<SrcFile>) -> u32 {
    if let Some(id) = self.lookup_id(file) {
      return id;
    }
    let mut files = self.files.write().unwrap();
    if let Some(i) = files.iter().position(|f| Arc::ptr_eq(f, file)) {
      return i as u32 + 1;
    }
    files.push(file.clone());
    files.len() as u32
  }

  /// The id of a previously interned file, or None.
  #[must_use] pub fn lookup_id(&self, file: &Arc<SrcFile>) -> Option<u32> {
    let files = self.files.read().unwrap();
    files.iter().position(|f| Arc::ptr_eq(f, file)).map(|i| i as u32 + 1)
  }

  /// The file with the given id, or None for id 0 / unknown ids.
  #[must_use] pub fn file(&self, id: u32) -> Option<Arc<SrcFile>> {
    if id == 0 { return None }
    self.files.read().unwrap().get(id as usize - 1).cloned()
  }

  /// Format a location as `file:line:col`.
  #[must_use] pub fn fmt_loc(&self, loc: Loc) -> String {
    match self.file(loc.file_id()) {
      Some(f) if loc.line() > 0 => format!("{}:{}:{}", f.name, loc.line(), loc.col()),
      Some(f) => f.name.clone(),
      None => "<unknown>".into(),
    }
  }
}

/// The origin of a diagnostic, resolved from a [`Loc`].
#[derive(Clone, Default)]
pub struct Origin {
  pub file: Option<Arc<SrcFile>>,
  pub line: u32, // 0 if unknown (remaining fields invalid if so)
  pub column: u32,
  pub width: u32,      // >0 if it's a range starting at (line, column)
  pub focus_col: u32,  // if >0, important column on `line`
}

impl Origin {
  #[must_use] pub fn of_loc(lm: &LocMap, loc: Loc) -> Origin {
    Origin {
      file: lm.file(loc.file_id()),
      line: loc.line(),
      column: loc.col(),
      width: loc.width(),
      focus_col: 0,
    }
  }

  #[must_use] pub fn with_focus(mut self, focus_col: u32) -> Origin {
    self.focus_col = focus_col;
    self
  }
}

impl fmt::Debug for Origin {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = self.file.as_ref().map_or("<unknown>", |f| f.name.as_str());
    write!(f, "{}:{}:{}", name, self.line, self.column)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pack_roundtrip() {
    let l = Loc::new(3, 41, 7, 2);
    assert_eq!(l.file_id(), 3);
    assert_eq!(l.line(), 41);
    assert_eq!(l.col(), 7);
    assert_eq!(l.width(), 2);
    assert!(l.is_known());
    assert!(!Loc::UNKNOWN.is_known());
  }

  #[test]
  fn saturates() {
    let l = Loc::new(u32::MAX, u32::MAX, u32::MAX, u32::MAX);
    assert_eq!(l.file_id(), (FILE_MAX) as u32);
    assert_eq!(l.line(), LINE_MAX as u32);
    assert_eq!(l.col(), COL_MAX as u32);
    assert_eq!(l.width(), WIDTH_MAX as u32);
  }

  #[test]
  fn union_extends_width() {
    let a = Loc::new(1, 5, 3, 2);
    let b = Loc::new(1, 5, 8, 4);
    let u = a.union(b);
    assert_eq!(u.col(), 3);
    assert_eq!(u.width(), 9);
    // different lines: unchanged
    let c = Loc::new(1, 6, 1, 1);
    assert_eq!(a.union(c), a);
  }

  #[test]
  fn locmap_intern() {
    let lm = LocMap::new();
    let f1 = SrcFile::new("a.co", b"hello".to_vec());
    let f2 = SrcFile::new("b.co", b"world".to_vec());
    let id1 = lm.intern(&f1);
    let id2 = lm.intern(&f2);
    assert_eq!(id1, 1);
    assert_eq!(id2, 2);
    assert_eq!(lm.intern(&f1), 1);
    assert!(Arc::ptr_eq(&lm.file(1).unwrap(), &f1));
    assert!(lm.file(0).is_none());
  }
}
