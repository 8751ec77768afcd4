//! Diagnostics reporting.
//!
//! The sink serializes writes with a mutex and counts errors atomically so
//! downstream passes can cheaply check whether to keep going. Each report is
//! rendered into a [`Diag`] record carrying the formatted message and source
//! line excerpts, then handed to the installed handler.

use std::fmt::Write as _;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use crate::loc::Origin;

/// Diagnostic severity.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DiagKind { Error, Warning, Help }

impl DiagKind {
  fn label(self) -> &'static str {
    match self {
      DiagKind::Error => "error",
      DiagKind::Warning => "warning",
      DiagKind::Help => "help",
    }
  }
}

/// A rendered diagnostic.
#[derive(Debug, Clone)]
pub struct Diag {
  pub kind: DiagKind,
  /// Full message including `file:line:col: severity:` prefix.
  pub msg: String,
  /// Short message without source location.
  pub msg_short: String,
  /// Source context: a few lines with a column callout (may be empty).
  pub src_lines: String,
  pub origin: Origin,
}

/// Receives rendered diagnostics. The default handler prints to stderr.
pub type DiagHandler = Box<dyn Fn(&Diag) + Send + Sync>;

/// The diagnostics sink.
pub struct Diagnostics {
  handler: Mutex<DiagHandler>,
  errcount: AtomicU32,
  warncount: AtomicU32,
  colors: bool,
}

fn env_colors() -> bool {
  match std::env::var("COMPIS_TERM_COLORS") {
    Ok(v) => !v.is_empty() && v != "0",
    Err(_) => false, // no tty detection here; callers can override
  }
}

impl Default for Diagnostics {
  fn default() -> Self { Self::new() }
}

impl Diagnostics {
  #[must_use] pub fn new() -> Diagnostics {
    Diagnostics {
      handler: Mutex::new(Box::new(|d: &Diag| {
        eprintln!("{}", d.msg);
        if !d.src_lines.is_empty() {
          eprintln!("{}", d.src_lines);
        }
      })),
      errcount: AtomicU32::new(0),
      warncount: AtomicU32::new(0),
      colors: env_colors(),
    }
  }

  /// Replace the handler, e.g. with a collector in tests.
  pub fn set_handler(&self, h: DiagHandler) {
    *self.handler.lock().unwrap() = h;
  }

  pub fn set_colors(&mut self, on: bool) { self.colors = on }

  /// Number of `Error` diagnostics reported so far.
  #[must_use] pub fn errcount(&self) -> u32 { self.errcount.load(Ordering::Acquire) }
  #[must_use] pub fn warncount(&self) -> u32 { self.warncount.load(Ordering::Acquire) }

  /// True when no errors have been reported.
  #[must_use] pub fn ok(&self) -> bool { self.errcount() == 0 }

  /// Report a diagnostic at `origin`.
  pub fn report(&self, origin: Origin, kind: DiagKind, msg_short: impl Into<String>) {
    let msg_short = msg_short.into();
    match kind {
      DiagKind::Error => { self.errcount.fetch_add(1, Ordering::AcqRel); }
      DiagKind::Warning => { self.warncount.fetch_add(1, Ordering::AcqRel); }
      DiagKind::Help => {}
    }

    let mut msg = String::new();
    if let Some(f) = &origin.file {
      if origin.line > 0 {
        let _ = write!(msg, "{}:{}:{}: ", f.name, origin.line, origin.column);
      } else {
        let _ = write!(msg, "{}: ", f.name);
      }
    }
    let _ = write!(msg, "{}: {}", kind.label(), msg_short);

    let src_lines = self.render_srclines(&origin);
    let d = Diag { kind, msg, msg_short, src_lines, origin };

    // serialize handler invocations
    let handler = self.handler.lock().unwrap();
    handler(&d);
  }

  /// Render source context lines with a `│` gutter and an arrow or
  /// underline marking the origin column/range.
  fn render_srclines(&self, origin: &Origin) -> String {
    let Some(file) = &origin.file else { return String::new() };
    if origin.line == 0 { return String::new() }
    let Some(line) = file.line(origin.line) else { return String::new() };

    let mut out = String::new();
    let lineno = origin.line;
    let linew = format!("{lineno}").len().max(3);
    let text = String::from_utf8_lossy(line);
    let text = text.trim_end_matches('\r');

    // preceding context line, dimmed in color mode
    if lineno > 1 {
      if let Some(prev) = file.line(lineno - 1) {
        let prev = String::from_utf8_lossy(prev);
        let _ = writeln!(out, "{:>linew$}   │ {}", lineno - 1, prev.trim_end_matches('\r'));
      }
    }

    let _ = writeln!(out, "{lineno:>linew$} → │ {text}");

    // callout line: "^" arrow at a single column, "~"*width for a range
    let col = if origin.focus_col > 0 { origin.focus_col } else { origin.column };
    if col > 0 {
      let pad: String = text.chars()
        .take(col as usize - 1)
        .map(|c| if c == '\t' { '\t' } else { ' ' })
        .collect();
      let mark = if origin.width > 1 && origin.focus_col == 0 {
        "~".repeat(origin.width as usize)
      } else {
        "^".into()
      };
      let mark = if self.colors { format!("\x1b[1;31m{mark}\x1b[0m") } else { mark };
      let _ = writeln!(out, "{:linew$}   │ {pad}{mark}", "");
    }

    while out.ends_with('\n') { out.pop(); }
    out
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::loc::SrcFile;
  use std::sync::Arc;

  fn collector() -> (Arc<Mutex<Vec<Diag>>>, DiagHandler) {
    let diags: Arc<Mutex<Vec<Diag>>> = Arc::default();
    let d2 = diags.clone();
    (diags, Box::new(move |d: &Diag| d2.lock().unwrap().push(d.clone())))
  }

  #[test]
  fn counts_errors() {
    let diags = Diagnostics::new();
    let (seen, h) = collector();
    diags.set_handler(h);
    assert!(diags.ok());
    diags.report(Origin::default(), DiagKind::Error, "bad");
    diags.report(Origin::default(), DiagKind::Help, "hint");
    assert_eq!(diags.errcount(), 1);
    assert!(!diags.ok());
    assert_eq!(seen.lock().unwrap().len(), 2);
  }

  #[test]
  fn renders_srcline_callout() {
    let mut diags = Diagnostics::new();
    diags.set_colors(false);
    let (seen, h) = collector();
    diags.set_handler(h);
    let file = SrcFile::new("t.co", b"fun main()\n  bogus!\n".to_vec());
    let origin = Origin {
      file: Some(file), line: 2, column: 3, width: 5, focus_col: 0,
    };
    diags.report(origin, DiagKind::Error, "nope");
    let seen = seen.lock().unwrap();
    assert!(seen[0].msg.starts_with("t.co:2:3: error: nope"));
    assert!(seen[0].src_lines.contains("bogus!"));
    assert!(seen[0].src_lines.contains("~~~~~"));
  }
}
