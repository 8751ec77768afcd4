//! Tokens produced by the scanner.

macro_rules! tokens {
  { $($name:ident: $repr:expr,)* @keywords $($kwname:ident: $kwrepr:expr,)* } => {
    /// A lexical token.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub enum Tok {
      $($name,)*
      $($kwname,)*
    }

    impl Tok {
      /// Source representation, e.g. `Tok::PlusPlus.repr() == "++"`.
      #[must_use] pub fn repr(self) -> &'static str {
        match self {
          $(Tok::$name => $repr,)*
          $(Tok::$kwname => $kwrepr,)*
        }
      }

      /// The keyword token for an identifier, if any.
      #[must_use] pub fn keyword(s: &[u8]) -> Option<Tok> {
        $(if s == $kwrepr.as_bytes() {
          return Some(Tok::$kwname);
        })*
        None
      }
    }
  };
}

tokens! {
  Eof: "eof",
  Semi: ";",

  LParen: "(", RParen: ")",
  LBrace: "{", RBrace: "}",
  LBrack: "[", RBrack: "]",

  Dot: ".",
  DotDotDot: "...",
  Colon: ":",
  Comma: ",",
  Question: "?",

  Plus: "+",
  PlusPlus: "++",
  Minus: "-",
  MinusMinus: "--",
  Star: "*",
  Slash: "/",
  Percent: "%",
  Tilde: "~",
  Not: "!",
  And: "&",
  AndAnd: "&&",
  Or: "|",
  OrOr: "||",
  Xor: "^",
  Shl: "<<",
  Shr: ">>",

  Eq: "==",
  NEq: "!=",

  Lt: "<",
  Gt: ">",
  LtEq: "<=",
  GtEq: ">=",

  Assign: "=",
  AddAssign: "+=",
  SubAssign: "-=",
  MulAssign: "*=",
  DivAssign: "/=",
  ModAssign: "%=",
  ShlAssign: "<<=",
  ShrAssign: ">>=",
  AndAssign: "&=",
  XorAssign: "^=",
  OrAssign: "|=",

  Comment: "comment",
  Id: "identifier",
  IntLit: "integer literal",
  FloatLit: "number literal",
  StrLit: "string literal",
  CharLit: "character literal",

  @keywords
  KwElse: "else",
  KwFalse: "false",
  KwFor: "for",
  KwFun: "fun",
  KwIf: "if",
  KwImport: "import",
  KwLet: "let",
  KwMut: "mut",
  KwPub: "pub",
  KwReturn: "return",
  KwTrue: "true",
  KwType: "type",
  KwVar: "var",
}

impl Tok {
  /// True for the compound assignment operators and `=`.
  #[must_use] pub fn is_assign(self) -> bool {
    matches!(self,
      Tok::Assign | Tok::AddAssign | Tok::SubAssign | Tok::MulAssign |
      Tok::DivAssign | Tok::ModAssign | Tok::ShlAssign | Tok::ShrAssign |
      Tok::AndAssign | Tok::XorAssign | Tok::OrAssign)
  }

  /// Human-oriented description used in diagnostics, e.g. `'+'` or
  /// `identifier`.
  #[must_use] pub fn describe(self) -> String {
    match self {
      Tok::Eof => "end of input".into(),
      Tok::Id => "identifier".into(),
      Tok::IntLit | Tok::FloatLit => "number".into(),
      Tok::StrLit => "string".into(),
      Tok::CharLit => "character".into(),
      Tok::Comment => "comment".into(),
      t => format!("'{}'", t.repr()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn keywords() {
    assert_eq!(Tok::keyword(b"fun"), Some(Tok::KwFun));
    assert_eq!(Tok::keyword(b"import"), Some(Tok::KwImport));
    assert_eq!(Tok::keyword(b"funs"), None);
    assert_eq!(Tok::keyword(b"Fun"), None);
  }

  #[test]
  fn describe() {
    assert_eq!(Tok::Plus.describe(), "'+'");
    assert_eq!(Tok::Eof.describe(), "end of input");
  }
}
