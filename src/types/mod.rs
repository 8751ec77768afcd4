//! The type system: interned structural types, type identity encoding,
//! compatibility, ownership classification and the type-function table.
//!
//! Types are interned into a process-wide [`TypeStore`] service; a [`Ty`] is
//! the identity of an interned type, so two structurally identical types
//! compare equal as plain integers. Every type also has a *typeid*: an
//! interned byte sequence encoding its structural identity, used to key the
//! type-function table and the public-API cache.

pub mod ast;
pub mod ir;

use std::sync::{Arc, RwLock};
use bitflags::bitflags;
use hashbrown::HashMap;
use smallvec::SmallVec;
use crate::Idx;
use crate::loc::Loc;
use crate::pkg::Def;
use crate::symbol::{Interner, Symbol};

/// Identity of an interned type. The default is `Ty::VOID`.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ty(u32);

impl Idx for Ty {
  fn into_usize(self) -> usize { self.0 as usize }
  fn from_usize(n: usize) -> Self { Ty(n as u32) }
}

impl std::fmt::Debug for Ty {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "t{}", self.0)
  }
}

macro_rules! primitives {
  ($($name:ident = $i:expr, $data:ident, $tag:expr, $size:expr, $srcname:expr;)*) => {
    impl Ty {
      $(pub const $name: Ty = Ty($i);)*
    }
    const PRIM_COUNT: u32 = 0 $(+ { let _ = $i; 1 })*;
    const PRIMS: &[(Type, u8, u64, &str)] = &[
      $((Type::$data, $tag, $size, $srcname),)*
    ];
  };
}

primitives! {
  VOID    = 0,  Void,    b'v', 0, "void";
  BOOL    = 1,  Bool,    b'b', 1, "bool";
  I8      = 2,  I8,      b'c', 1, "i8";
  I16     = 3,  I16,     b's', 2, "i16";
  I32     = 4,  I32,     b'w', 4, "i32";
  I64     = 5,  I64,     b'l', 8, "i64";
  INT     = 6,  Int,     b'i', 4, "int";
  U8      = 7,  U8,      b'C', 1, "u8";
  U16     = 8,  U16,     b'S', 2, "u16";
  U32     = 9,  U32,     b'W', 4, "u32";
  U64     = 10, U64,     b'L', 8, "u64";
  UINT    = 11, Uint,    b'I', 4, "uint";
  F32     = 12, F32,     b'f', 4, "f32";
  F64     = 13, F64,     b'd', 8, "f64";
  UNKNOWN = 14, Unknown, b'u', 0, "unknown";
}

bitflags! {
  /// Flags attached to interned types.
  #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
  pub struct TypeFlags: u8 {
    const DROP      = 1 << 0; // type has a drop() type function
    const SUBOWNERS = 1 << 1; // type contains owning elements
    const CYCLIC    = 1 << 2; // type references itself
    const TEMPLATE  = 1 << 3; // template definition
    const TEMPLATEI = 1 << 4; // template instance
  }
}

/// A struct field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
  pub name: Symbol,
  pub ty: Ty,
}

/// A function parameter as part of a function type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunParam {
  pub name: Option<Symbol>,
  pub ty: Ty,
  pub isthis: bool,
  pub ismut: bool,
}

/// Structural type data. This is the interning key: two types with equal
/// `Type` data are the same [`Ty`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
  Void, Bool,
  I8, I16, I32, I64, Int,
  U8, U16, U32, U64, Uint,
  F32, F64,
  /// Placeholder "type not yet known"; also the type of unchecked nodes.
  Unknown,

  /// `*T`: owning pointer.
  Ptr(Ty),
  /// `&T`.
  Ref(Ty),
  /// `mut&T`.
  MutRef(Ty),
  /// `&[T]`.
  Slice(Ty),
  /// `mut&[T]`.
  MutSlice(Ty),
  /// `?T`.
  Optional(Ty),
  /// `[T]` with a known length.
  Array(Ty, u64),
  /// Ordered fields; `name` is None for anonymous struct bodies.
  Struct { name: Option<Symbol>, fields: SmallVec<[Field; 4]> },
  /// `type A B`: named alias of `elem`.
  Alias { name: Symbol, elem: Ty },
  /// Function type.
  Fun { params: SmallVec<[FunParam; 4]>, result: Ty },
  /// A package namespace (the type of an imported package identifier).
  Ns { name: Symbol },
  /// Template definition: a named type parameterized over `params`.
  Template { name: Symbol, params: SmallVec<[Symbol; 2]>, body: Ty },
  /// A template parameter occurring inside a template body.
  Placeholder { name: Symbol },
  /// Template instantiation `recv<args...>`.
  Instance { recv: Ty, args: SmallVec<[Ty; 2]> },
  /// A declared-but-not-yet-defined named type. Created by
  /// [`TypeStore::declare_named`] so that a type body can refer to the type
  /// being defined (always through a pointer or reference); replaced by the
  /// definition via [`TypeStore::define_named`].
  Named { name: Symbol },
  /// Transient parse-time name; resolved (and never interned as the final
  /// type of anything) by the type checker.
  Unresolved { name: Symbol },
}

struct TypeEnt {
  data: Type,
  flags: TypeFlags,
  size: u64,
  align: u8,
  typeid: Option<Arc<[u8]>>,
  /// Where the type was first defined (diagnostics only; not identity).
  loc: Loc,
}

struct Inner {
  ents: Vec<TypeEnt>,
  map: HashMap<Type, Ty>,
}

/// The type intern table. Read-mostly; see the module documentation.
pub struct TypeStore(RwLock<Inner>);

/// Append `v` as ULEB128.
pub fn leb128_write_u32(buf: &mut Vec<u8>, mut v: u32) {
  loop {
    let mut b = (v & 0x7f) as u8;
    v >>= 7;
    if v != 0 { b |= 0x80 }
    buf.push(b);
    if v == 0 { break }
  }
}

/// Decode ULEB128, returning (value, bytes consumed).
#[must_use] pub fn leb128_read_u32(buf: &[u8]) -> Option<(u32, usize)> {
  let mut v = 0u32;
  for (i, &b) in buf.iter().enumerate().take(5) {
    v |= u32::from(b & 0x7f) << (i * 7);
    if b & 0x80 == 0 {
      return Some((v, i + 1));
    }
  }
  None
}

impl Default for TypeStore {
  fn default() -> Self { Self::new() }
}

impl TypeStore {
  /// Create a store with the primitive types pre-interned at fixed indices.
  #[must_use] pub fn new() -> TypeStore {
    let mut inner = Inner {
      ents: Vec::with_capacity(64),
      map: HashMap::with_capacity(64),
    };
    for (i, (data, tag, size, _)) in PRIMS.iter().enumerate() {
      inner.map.insert(data.clone(), Ty(i as u32));
      inner.ents.push(TypeEnt {
        data: data.clone(),
        flags: TypeFlags::empty(),
        size: *size,
        align: (*size).clamp(1, 8) as u8,
        typeid: Some(Arc::from([*tag].as_slice())),
        loc: Loc::UNKNOWN,
      });
    }
    debug_assert_eq!(inner.ents.len() as u32, PRIM_COUNT);
    TypeStore(RwLock::new(inner))
  }

  /// Number of types interned so far.
  #[must_use] pub fn len(&self) -> usize { self.0.read().unwrap().ents.len() }
  #[must_use] pub fn is_empty(&self) -> bool { self.len() == 0 }

  /// The primitive type named `name` in source, if any (e.g. "i32").
  #[must_use] pub fn prim_by_name(&self, name: &str) -> Option<Ty> {
    PRIMS.iter().position(|&(_, _, _, n)| n == name && n != "unknown")
      .map(Ty::from_usize)
  }

  /// Intern `data`, returning the identity of the (possibly pre-existing)
  /// type. Interning is structural: equal data yields equal `Ty`.
  pub fn intern(&self, data: Type) -> Ty {
    if let Some(&t) = self.0.read().unwrap().map.get(&data) {
      return t;
    }
    let mut inner = self.0.write().unwrap();
    if let Some(&t) = inner.map.get(&data) {
      return t;
    }
    let (size, align, flags) = inner.measure(&data);
    let t = Ty(inner.ents.len() as u32);
    inner.ents.push(TypeEnt { data: data.clone(), flags, size, align, typeid: None, loc: Loc::UNKNOWN });
    inner.map.insert(data, t);
    t
  }

  /// Declare a named user type (struct, alias or template), returning its
  /// nominal identity. Declaring the same name twice returns the same `Ty`.
  /// The body is attached later with [`define_named`](Self::define_named),
  /// which allows the body to reference the type itself through a pointer.
  pub fn declare_named(&self, name: Symbol, loc: Loc) -> Ty {
    self.intern_at(Type::Named { name }, loc)
  }

  /// Attach the definition of a previously declared named type. The `Ty`
  /// keeps its identity; data, size and flags are replaced.
  pub fn define_named(&self, t: Ty, data: Type) {
    let mut inner = self.0.write().unwrap();
    let (size, align, flags) = inner.measure(&data);
    let ent = &mut inner.ents[t.into_usize()];
    debug_assert!(
      matches!(ent.data, Type::Named { .. }),
      "define_named on a non-declared type");
    ent.data = data;
    ent.size = size;
    ent.align = align;
    ent.flags |= flags;
    ent.typeid = None;
  }

  /// Intern with a definition location recorded for diagnostics.
  pub fn intern_at(&self, data: Type, loc: Loc) -> Ty {
    let t = self.intern(data);
    let mut inner = self.0.write().unwrap();
    let ent = &mut inner.ents[t.into_usize()];
    if !ent.loc.is_known() {
      ent.loc = loc;
    }
    t
  }

  #[must_use] pub fn data(&self, t: Ty) -> Type {
    self.0.read().unwrap().ents[t.into_usize()].data.clone()
  }

  #[must_use] pub fn flags(&self, t: Ty) -> TypeFlags {
    self.0.read().unwrap().ents[t.into_usize()].flags
  }

  pub fn add_flags(&self, t: Ty, flags: TypeFlags) {
    self.0.write().unwrap().ents[t.into_usize()].flags |= flags;
  }

  #[must_use] pub fn size(&self, t: Ty) -> u64 {
    self.0.read().unwrap().ents[t.into_usize()].size
  }

  #[must_use] pub fn align(&self, t: Ty) -> u8 {
    self.0.read().unwrap().ents[t.into_usize()].align
  }

  #[must_use] pub fn loc(&self, t: Ty) -> Loc {
    self.0.read().unwrap().ents[t.into_usize()].loc
  }

  #[must_use] pub fn is_prim(&self, t: Ty) -> bool { t.0 < PRIM_COUNT }

  #[must_use] pub fn is_bool(&self, t: Ty) -> bool { t == Ty::BOOL }

  #[must_use] pub fn is_unsigned(&self, t: Ty) -> bool {
    matches!(t, Ty::U8 | Ty::U16 | Ty::U32 | Ty::U64 | Ty::UINT)
  }

  #[must_use] pub fn is_integer(&self, t: Ty) -> bool {
    (Ty::I8.0..=Ty::UINT.0).contains(&t.0)
  }

  #[must_use] pub fn is_float(&self, t: Ty) -> bool {
    t == Ty::F32 || t == Ty::F64
  }

  #[must_use] pub fn is_ptr(&self, t: Ty) -> bool {
    matches!(self.data(t), Type::Ptr(_))
  }

  #[must_use] pub fn is_ref(&self, t: Ty) -> bool {
    matches!(self.data(t), Type::Ref(_) | Type::MutRef(_))
  }

  #[must_use] pub fn is_opt(&self, t: Ty) -> bool {
    matches!(self.data(t), Type::Optional(_))
  }

  /// The element type of pointer-like, slice, optional and array types.
  #[must_use] pub fn elem(&self, t: Ty) -> Option<Ty> {
    match self.data(t) {
      Type::Ptr(e) | Type::Ref(e) | Type::MutRef(e) | Type::Slice(e) |
      Type::MutSlice(e) | Type::Optional(e) | Type::Array(e, _) => Some(e),
      _ => None,
    }
  }

  /// Unwrap alias chains, e.g. `A` (alias of `B`, alias of `int`) => `int`.
  #[must_use] pub fn unwrap_alias(&self, mut t: Ty) -> Ty {
    while let Type::Alias { elem, .. } = self.data(t) {
      t = elem;
    }
    t
  }

  /// Unwrap optional, ref and ptr, e.g. `?&T` => `&T` => `T`.
  #[must_use] pub fn unwrap_ptr(&self, mut t: Ty) -> Ty {
    loop {
      match self.data(t) {
        Type::Optional(e) | Type::Ref(e) | Type::MutRef(e) | Type::Ptr(e) => t = e,
        _ => return t,
      }
    }
  }

  /// True when `t` carries responsibility for releasing resources: a type
  /// with a drop function or owning elements, an owning pointer, or an
  /// alias/optional of such a type. Alias chains are unwrapped to a bounded
  /// depth.
  #[must_use] pub fn is_owner(&self, t: Ty) -> bool {
    self.is_owner_at_depth(t, 16)
  }

  fn is_owner_at_depth(&self, t: Ty, depth: u32) -> bool {
    let t = match self.data(t) {
      Type::Optional(e) => e,
      _ => t,
    };
    if self.flags(t).intersects(TypeFlags::DROP | TypeFlags::SUBOWNERS) {
      return true;
    }
    match self.data(t) {
      Type::Ptr(_) => true,
      Type::Alias { elem, .. } if depth > 0 => self.is_owner_at_depth(elem, depth - 1),
      _ => false,
    }
  }

  #[must_use] pub fn is_copyable(&self, t: Ty) -> bool { !self.is_owner(t) }

  /// Loose convertibility used by `as` casts: any two primitives convert.
  #[must_use] pub fn is_convertible(&self, dst: Ty, src: Ty) -> bool {
    dst == src || (self.is_prim(dst) && self.is_prim(src))
  }

  /// Assignment compatibility `dst <= src`. Aliases are transparent.
  #[must_use] pub fn is_compat(&self, dst: Ty, src: Ty) -> bool {
    let dst = self.unwrap_alias(dst);
    let src = self.unwrap_alias(src);
    if dst == src {
      return true;
    }
    match self.data(dst) {
      // integers: exact kind match (identity covers signedness)
      Type::I8 | Type::I16 | Type::I32 | Type::I64 | Type::Int |
      Type::U8 | Type::U16 | Type::U32 | Type::U64 | Type::Uint => dst == src,
      // *T <= *U, *T <= &U
      Type::Ptr(d) => match self.data(src) {
        Type::Ptr(s) | Type::Ref(s) => self.is_compat(d, s),
        _ => false,
      },
      // &T <= &U | mut&U | *U
      Type::Ref(d) => match self.data(src) {
        Type::Ref(s) | Type::MutRef(s) | Type::Ptr(s) => self.is_compat(d, s),
        _ => false,
      },
      // mut&T <= mut&U | *U   (never from &U)
      Type::MutRef(d) => match self.data(src) {
        Type::MutRef(s) | Type::Ptr(s) => self.is_compat(d, s),
        _ => false,
      },
      // ?T <= ?U | U
      Type::Optional(d) => match self.data(src) {
        Type::Optional(s) => self.is_compat(d, s),
        _ => self.is_compat(d, src),
      },
      // same interned type (equal typeid)
      _ => false,
    }
  }

  /// The interned typeid byte sequence for `t`.
  ///
  /// Primitives are a single tag byte; compound types are a tag followed by
  /// leb128-length-prefixed sequences of their component typeids.
  #[must_use] pub fn typeid(&self, t: Ty) -> Arc<[u8]> {
    if let Some(id) = &self.0.read().unwrap().ents[t.into_usize()].typeid {
      return id.clone();
    }
    let mut inner = self.0.write().unwrap();
    let mut buf = Vec::with_capacity(16);
    let mut visiting = Vec::new();
    inner.encode_typeid(t, &mut buf, &mut visiting);
    let id: Arc<[u8]> = buf.into();
    inner.ents[t.into_usize()].typeid = Some(id.clone());
    id
  }

  /// Source-level rendering of a type, for diagnostics: `*int`, `?Foo`, …
  #[must_use] pub fn fmt(&self, syms: &Interner, t: Ty) -> String {
    match self.data(t) {
      Type::Ptr(e) => format!("*{}", self.fmt(syms, e)),
      Type::Ref(e) => format!("&{}", self.fmt(syms, e)),
      Type::MutRef(e) => format!("mut&{}", self.fmt(syms, e)),
      Type::Slice(e) => format!("&[{}]", self.fmt(syms, e)),
      Type::MutSlice(e) => format!("mut&[{}]", self.fmt(syms, e)),
      Type::Optional(e) => format!("?{}", self.fmt(syms, e)),
      Type::Array(e, 0) => format!("[{}]", self.fmt(syms, e)),
      Type::Array(e, n) => format!("[{} {}]", self.fmt(syms, e), n),
      Type::Struct { name: Some(n), .. } => syms.name(n).to_string(),
      Type::Struct { name: None, fields } => {
        let fs: Vec<String> = fields.iter()
          .map(|f| format!("{} {}", syms.name(f.name), self.fmt(syms, f.ty)))
          .collect();
        format!("{{{}}}", fs.join("; "))
      }
      Type::Alias { name, .. } | Type::Ns { name } | Type::Placeholder { name } |
      Type::Template { name, .. } | Type::Unresolved { name } | Type::Named { name } =>
        syms.name(name).to_string(),
      Type::Fun { params, result } => {
        let ps: Vec<String> = params.iter().map(|p| self.fmt(syms, p.ty)).collect();
        if result == Ty::VOID {
          format!("fun({})", ps.join(", "))
        } else {
          format!("fun({}) {}", ps.join(", "), self.fmt(syms, result))
        }
      }
      Type::Instance { recv, args } => {
        let args: Vec<String> = args.iter().map(|&a| self.fmt(syms, a)).collect();
        format!("{}<{}>", self.fmt(syms, recv), args.join(","))
      }
      _ => {
        // primitive
        PRIMS[t.into_usize()].3.to_string()
      }
    }
  }
}

impl Inner {
  /// Size, alignment and intrinsic flags for to-be-interned data.
  /// Component types are already interned (types are built bottom-up).
  fn measure(&self, data: &Type) -> (u64, u8, TypeFlags) {
    let ent = |t: Ty| &self.ents[t.into_usize()];
    let owner = |t: Ty| {
      ent(t).flags.intersects(TypeFlags::DROP | TypeFlags::SUBOWNERS)
        || matches!(ent(t).data, Type::Ptr(_))
    };
    match data {
      Type::Ptr(_) | Type::Ref(_) | Type::MutRef(_) | Type::Fun { .. } =>
        (8, 8, TypeFlags::empty()),
      Type::Slice(_) | Type::MutSlice(_) => (16, 8, TypeFlags::empty()),
      Type::Optional(e) => {
        let f = if owner(*e) { TypeFlags::SUBOWNERS } else { TypeFlags::empty() };
        // pointer elems use the NULL niche; others add a presence byte
        if matches!(ent(*e).data, Type::Ptr(_) | Type::Ref(_) | Type::MutRef(_)) {
          (ent(*e).size, ent(*e).align, f)
        } else {
          let align = ent(*e).align.max(1);
          (ent(*e).size + u64::from(align), align, f)
        }
      }
      Type::Array(e, n) => {
        let f = if owner(*e) { TypeFlags::SUBOWNERS } else { TypeFlags::empty() };
        (ent(*e).size * n, ent(*e).align, f)
      }
      Type::Struct { fields, .. } => {
        let mut size = 0u64;
        let mut align = 1u8;
        let mut flags = TypeFlags::empty();
        for f in fields {
          let fa = ent(f.ty).align.max(1);
          align = align.max(fa);
          size = size.next_multiple_of(u64::from(fa)) + ent(f.ty).size;
          if owner(f.ty) {
            flags |= TypeFlags::SUBOWNERS;
          }
        }
        (size.next_multiple_of(u64::from(align)), align, flags)
      }
      Type::Alias { elem, .. } => (ent(*elem).size, ent(*elem).align, TypeFlags::empty()),
      Type::Template { .. } => (0, 1, TypeFlags::TEMPLATE),
      Type::Instance { .. } => (0, 1, TypeFlags::TEMPLATEI),
      _ => (0, 1, TypeFlags::empty()),
    }
  }

  fn encode_typeid(&self, t: Ty, buf: &mut Vec<u8>, visiting: &mut Vec<Ty>) {
    if let Some(id) = &self.ents[t.into_usize()].typeid {
      buf.extend_from_slice(id);
      return;
    }
    // cyclic types (self-reference through a pointer) fall back to a
    // nominal encoding to keep the id finite
    if visiting.contains(&t) {
      buf.push(b'N');
      leb128_write_u32(buf, t.into_usize() as u32);
      return;
    }
    visiting.push(t);
    match self.ents[t.into_usize()].data.clone() {
      Type::Ptr(e) => { buf.push(b'*'); self.encode_typeid(e, buf, visiting) }
      Type::Ref(e) => { buf.push(b'&'); self.encode_typeid(e, buf, visiting) }
      Type::MutRef(e) => { buf.push(b'M'); self.encode_typeid(e, buf, visiting) }
      Type::Slice(e) => { buf.push(b'['); self.encode_typeid(e, buf, visiting) }
      Type::MutSlice(e) => { buf.push(b'm'); self.encode_typeid(e, buf, visiting) }
      Type::Optional(e) => { buf.push(b'?'); self.encode_typeid(e, buf, visiting) }
      Type::Array(e, n) => {
        buf.push(b'A');
        leb128_write_u32(buf, (n & 0xffff_ffff) as u32);
        leb128_write_u32(buf, (n >> 32) as u32);
        self.encode_typeid(e, buf, visiting);
      }
      Type::Struct { fields, .. } => {
        buf.push(b'{');
        leb128_write_u32(buf, fields.len() as u32);
        for f in &fields {
          self.encode_typeid(f.ty, buf, visiting);
        }
      }
      Type::Fun { params, result } => {
        buf.push(b'^');
        self.encode_typeid(result, buf, visiting);
        leb128_write_u32(buf, params.len() as u32);
        for p in &params {
          self.encode_typeid(p.ty, buf, visiting);
        }
      }
      Type::Alias { name, elem } => {
        buf.push(b'=');
        leb128_write_u32(buf, name.into_usize() as u32);
        self.encode_typeid(elem, buf, visiting);
      }
      Type::Ns { name } | Type::Placeholder { name } | Type::Unresolved { name } |
      Type::Named { name } => {
        buf.push(b'P');
        leb128_write_u32(buf, name.into_usize() as u32);
      }
      Type::Template { name, body, .. } => {
        buf.push(b'T');
        leb128_write_u32(buf, name.into_usize() as u32);
        let _ = body;
      }
      Type::Instance { recv, args } => {
        buf.push(b'<');
        self.encode_typeid(recv, buf, visiting);
        leb128_write_u32(buf, args.len() as u32);
        for &a in &args {
          self.encode_typeid(a, buf, visiting);
        }
      }
      // primitives always have a precomputed typeid
      _ => unreachable!("primitive without typeid"),
    }
    visiting.pop();
  }
}

/// A registered type function: where it is defined and its function type.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TypeFun {
  pub def: Def,
  pub ty: Ty,
}

/// Maps `(receiver type, name)` to type functions.
/// Each package has one describing the type functions it defines.
#[derive(Default)]
pub struct TypeFunTab {
  m: RwLock<HashMap<(Ty, Symbol), TypeFun>>,
}

impl TypeFunTab {
  #[must_use] pub fn new() -> TypeFunTab { TypeFunTab::default() }

  /// Register a type function. If one is already registered under the same
  /// key, the existing entry is returned unchanged.
  pub fn add(&self, t: Ty, name: Symbol, f: TypeFun) -> TypeFun {
    *self.m.write().unwrap().entry((t, name)).or_insert(f)
  }

  /// Look up a type function, considering alias types:
  /// 1. unwrap optional, ref and ptr so e.g. `&MyT` becomes `MyT`;
  /// 2. look up `MyT.name`; if found, done;
  /// 3. if `MyT` is an alias, unwrap one hop and repeat.
  #[must_use] pub fn lookup(&self, ts: &TypeStore, t: Ty, name: Symbol) -> Option<TypeFun> {
    let m = self.m.read().unwrap();
    let mut t = t;
    loop {
      t = ts.unwrap_ptr(t);
      if let Some(&f) = m.get(&(t, name)) {
        return Some(f);
      }
      match ts.data(t) {
        Type::Alias { elem, .. } => t = elem,
        _ => return None,
      }
    }
  }
}

/// Operations shared by AST operators and IR values.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Op {
  // IR-only ops
  Noop, Phi, Arg, IConst, FConst, Zero,
  Move, Drop, Borrow, BorrowMut, Deref, Gep, Cast, OCheck,
  Call, Fun, Str, Array,
  // arithmetic and bitwise
  Add, Sub, Mul, Div, Mod,
  And, Or, Xor, Shl, Shr,
  LAnd, LOr,
  // comparison
  Eq, NEq, Lt, Gt, LtEq, GtEq,
  // unary
  Not, BitNot, Neg, Inc, Dec,
}

impl Op {
  /// Upper-case mnemonic used in IR dumps.
  #[must_use] pub fn name(self) -> &'static str {
    match self {
      Op::Noop => "NOOP", Op::Phi => "PHI", Op::Arg => "ARG",
      Op::IConst => "ICONST", Op::FConst => "FCONST", Op::Zero => "ZERO",
      Op::Move => "MOVE", Op::Drop => "DROP",
      Op::Borrow => "BORROW", Op::BorrowMut => "BORROW_MUT",
      Op::Deref => "DEREF", Op::Gep => "GEP", Op::Cast => "CAST",
      Op::OCheck => "OCHECK", Op::Call => "CALL", Op::Fun => "FUN",
      Op::Str => "STR", Op::Array => "ARRAY",
      Op::Add => "ADD", Op::Sub => "SUB", Op::Mul => "MUL", Op::Div => "DIV",
      Op::Mod => "MOD", Op::And => "AND", Op::Or => "OR", Op::Xor => "XOR",
      Op::Shl => "SHL", Op::Shr => "SHR", Op::LAnd => "LAND", Op::LOr => "LOR",
      Op::Eq => "EQ", Op::NEq => "NEQ", Op::Lt => "LT", Op::Gt => "GT",
      Op::LtEq => "LTEQ", Op::GtEq => "GTEQ",
      Op::Not => "NOT", Op::BitNot => "BITNOT", Op::Neg => "NEG",
      Op::Inc => "INC", Op::Dec => "DEC",
    }
  }

  /// True for comparison operators, whose result type is bool.
  #[must_use] pub fn is_cmp(self) -> bool {
    matches!(self, Op::Eq | Op::NEq | Op::Lt | Op::Gt | Op::LtEq | Op::GtEq)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use smallvec::smallvec;

  fn store() -> TypeStore { TypeStore::new() }

  #[test]
  fn prim_identity() {
    let ts = store();
    assert_eq!(ts.prim_by_name("int"), Some(Ty::INT));
    assert_eq!(ts.prim_by_name("u64"), Some(Ty::U64));
    assert_eq!(ts.prim_by_name("nope"), None);
    assert_eq!(ts.prim_by_name("unknown"), None);
    assert_eq!(ts.typeid(Ty::INT).as_ref(), b"i");
    assert_eq!(ts.typeid(Ty::BOOL).as_ref(), b"b");
  }

  #[test]
  fn typeid_equivalence() {
    let ts = store();
    let p1 = ts.intern(Type::Ptr(Ty::INT));
    let p2 = ts.intern(Type::Ptr(Ty::INT));
    assert_eq!(p1, p2);
    assert_eq!(ts.typeid(p1), ts.typeid(p2));
    assert_eq!(ts.typeid(p1).as_ref(), b"*i");

    let o = ts.intern(Type::Optional(p1));
    assert_eq!(ts.typeid(o).as_ref(), b"?*i");

    let s1 = ts.intern(Type::Struct {
      name: None,
      fields: smallvec![Field { name: Symbol::UNDER, ty: Ty::INT },
                        Field { name: Symbol::UNDER, ty: p1 }],
    });
    assert_eq!(ts.typeid(s1).as_ref(), b"{\x02i*i");

    let f = ts.intern(Type::Fun {
      params: smallvec![FunParam { name: None, ty: Ty::BOOL, isthis: false, ismut: false }],
      result: Ty::VOID,
    });
    assert_eq!(ts.typeid(f).as_ref(), b"^v\x01b");
  }

  #[test]
  fn compat_rules() {
    let ts = store();
    let int_ = Ty::INT;
    let ptr = ts.intern(Type::Ptr(int_));
    let r = ts.intern(Type::Ref(int_));
    let mr = ts.intern(Type::MutRef(int_));
    let opt = ts.intern(Type::Optional(int_));

    // reflexivity
    for t in [int_, ptr, r, mr, opt] {
      assert!(ts.is_compat(t, t));
    }
    // &T <= mut&T but not vice versa
    assert!(ts.is_compat(r, mr));
    assert!(!ts.is_compat(mr, r));
    // both reference forms accept *T
    assert!(ts.is_compat(r, ptr));
    assert!(ts.is_compat(mr, ptr));
    // *T <= &U
    assert!(ts.is_compat(ptr, r));
    // ?T <= T and ?T <= ?T
    assert!(ts.is_compat(opt, int_));
    assert!(ts.is_compat(opt, opt));
    assert!(!ts.is_compat(int_, opt));
    // integers: no implicit conversions
    assert!(!ts.is_compat(Ty::I32, Ty::U32));
    assert!(!ts.is_compat(Ty::I32, Ty::I64));
  }

  #[test]
  fn alias_transparent_for_compat() {
    let ts = store();
    let syms = Interner::new();
    let a = ts.intern(Type::Alias { name: syms.intern("A"), elem: Ty::INT });
    assert!(ts.is_compat(a, Ty::INT));
    assert!(ts.is_compat(Ty::INT, a));
    // but the alias has its own typeid for dispatch
    assert_ne!(ts.typeid(a), ts.typeid(Ty::INT));
  }

  #[test]
  fn owners() {
    let ts = store();
    let ptr = ts.intern(Type::Ptr(Ty::INT));
    assert!(ts.is_owner(ptr));
    assert!(!ts.is_owner(Ty::INT));
    let opt = ts.intern(Type::Optional(ptr));
    assert!(ts.is_owner(opt));
    let st = ts.intern(Type::Struct {
      name: None,
      fields: smallvec![Field { name: Symbol::UNDER, ty: ptr }],
    });
    assert!(ts.flags(st).contains(TypeFlags::SUBOWNERS));
    assert!(ts.is_owner(st));
    let syms = Interner::new();
    let alias = ts.intern(Type::Alias { name: syms.intern("P"), elem: ptr });
    assert!(ts.is_owner(alias));
  }

  #[test]
  fn typefuntab_lookup_unwraps() {
    let ts = store();
    let syms = Interner::new();
    let foo = ts.intern(Type::Struct { name: Some(syms.intern("Foo")), fields: smallvec![] });
    let alias = ts.intern(Type::Alias { name: syms.intern("Bar"), elem: foo });
    let name = syms.intern("len");
    let tab = TypeFunTab::new();
    let def = TypeFun {
      def: Def { unit: 0, node: crate::types::ast::NodeId::from_usize(7) },
      ty: Ty::UNKNOWN,
    };
    tab.add(foo, name, def);

    let r = ts.intern(Type::Ref(foo));
    let optref = ts.intern(Type::Optional(r));
    assert_eq!(tab.lookup(&ts, foo, name), Some(def));
    assert_eq!(tab.lookup(&ts, r, name), Some(def));
    assert_eq!(tab.lookup(&ts, optref, name), Some(def));
    // alias of Foo resolves through the alias chain
    assert_eq!(tab.lookup(&ts, alias, name), Some(def));
    assert_eq!(tab.lookup(&ts, foo, syms.intern("cap")), None);
  }

  #[test]
  fn nested_instance_memoization() {
    // T<U<V>>: the inner instance is interned first, so the outer key embeds
    // the interned inner instance and memoization is exact.
    let ts = store();
    let syms = Interner::new();
    let t = ts.intern(Type::Template {
      name: syms.intern("T"), params: smallvec![syms.intern("X")], body: Ty::UNKNOWN,
    });
    let u = ts.intern(Type::Template {
      name: syms.intern("U"), params: smallvec![syms.intern("X")], body: Ty::UNKNOWN,
    });
    let uv1 = ts.intern(Type::Instance { recv: u, args: smallvec![Ty::INT] });
    let uv2 = ts.intern(Type::Instance { recv: u, args: smallvec![Ty::INT] });
    assert_eq!(uv1, uv2);
    let tuv1 = ts.intern(Type::Instance { recv: t, args: smallvec![uv1] });
    let tuv2 = ts.intern(Type::Instance { recv: t, args: smallvec![uv2] });
    assert_eq!(tuv1, tuv2);
    assert_eq!(ts.typeid(tuv1), ts.typeid(tuv2));
    assert!(ts.flags(tuv1).contains(TypeFlags::TEMPLATEI));
  }

  #[test]
  fn leb128() {
    let mut buf = Vec::new();
    for v in [0u32, 1, 127, 128, 300, u32::MAX] {
      buf.clear();
      leb128_write_u32(&mut buf, v);
      assert_eq!(leb128_read_u32(&buf), Some((v, buf.len())));
    }
  }
}
