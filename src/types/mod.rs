//! Interned type model for self-describing values
//!
//! Every value carries a `Type` handle interned in a shared `TypeContext`.
//! Two structurally equal types always resolve to the same handle and the
//! same numeric id, so type identity checks are integer comparisons and
//! type ids can be embedded in encoded data (group-table keys, spill
//! records) and resolved back later.

mod vector;

pub use vector::TypeVectorTable;

use hashbrown::HashMap;
use parking_lot::RwLock;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A named field of a record type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    pub name: String,
    pub typ: Type,
}

impl Field {
    pub fn new(name: impl Into<String>, typ: Type) -> Self {
        Self {
            name: name.into(),
            typ,
        }
    }
}

/// Structural description of a type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Kind {
    Null,
    Bool,
    Int64,
    Float64,
    String,
    Bytes,
    Record(Vec<Field>),
    List(Type),
    Error(Type),
}

/// Marker for the two distinguished error types the engine reserves for
/// its own signalling. The marker lives on the interned type, never in the
/// payload, so an ordinary error value whose message happens to read
/// "quiet" or "missing" is still just an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Sentinel {
    Quiet,
    Missing,
}

/// An interned type handle.
///
/// Handles are cheap to clone and compare; equality and hashing go through
/// the interned id, which is only meaningful within the `TypeContext` that
/// produced the handle.
#[derive(Clone)]
pub struct Type(Arc<TypeInner>);

#[derive(Debug)]
struct TypeInner {
    id: u32,
    kind: Kind,
    sentinel: Option<Sentinel>,
}

impl Type {
    pub fn id(&self) -> u32 {
        self.0.id
    }

    pub fn kind(&self) -> &Kind {
        &self.0.kind
    }

    pub fn is_error(&self) -> bool {
        matches!(self.0.kind, Kind::Error(_))
    }

    pub(crate) fn sentinel(&self) -> Option<Sentinel> {
        self.0.sentinel
    }

    pub fn is_record(&self) -> bool {
        matches!(self.0.kind, Kind::Record(_))
    }

    /// Fields of a record type, or `None` for any other kind.
    pub fn fields(&self) -> Option<&[Field]> {
        match &self.0.kind {
            Kind::Record(fields) => Some(fields),
            _ => None,
        }
    }

    /// Element type of a list type, or `None` for any other kind.
    pub fn list_elem(&self) -> Option<&Type> {
        match &self.0.kind {
            Kind::List(elem) => Some(elem),
            _ => None,
        }
    }
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self, self.0.id)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.kind {
            Kind::Null => write!(f, "null"),
            Kind::Bool => write!(f, "bool"),
            Kind::Int64 => write!(f, "int64"),
            Kind::Float64 => write!(f, "float64"),
            Kind::String => write!(f, "string"),
            Kind::Bytes => write!(f, "bytes"),
            Kind::Record(fields) => {
                write!(f, "{{")?;
                for (i, fld) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}:{}", fld.name, fld.typ)?;
                }
                write!(f, "}}")
            }
            Kind::List(elem) => write!(f, "[{}]", elem),
            Kind::Error(inner) => write!(f, "error({})", inner),
        }
    }
}

/// Shared type interner.
///
/// The context is shared between the operator task and any thread that
/// decodes spilled records, so interning is guarded by an internal lock.
/// Primitive types are registered at construction with fixed ids.
pub struct TypeContext {
    null: Type,
    bool_: Type,
    int64: Type,
    float64: Type,
    string: Type,
    bytes: Type,
    quiet: Type,
    missing: Type,
    inner: RwLock<ContextInner>,
}

struct ContextInner {
    by_id: Vec<Type>,
    lookup: HashMap<Kind, Type>,
}

impl TypeContext {
    pub fn new() -> Self {
        let mut by_id = Vec::new();
        let mut lookup = HashMap::new();
        let mut prim = |kind: Kind| {
            let typ = Type(Arc::new(TypeInner {
                id: by_id.len() as u32,
                kind: kind.clone(),
                sentinel: None,
            }));
            by_id.push(typ.clone());
            lookup.insert(kind, typ.clone());
            typ
        };
        let null = prim(Kind::Null);
        let bool_ = prim(Kind::Bool);
        let int64 = prim(Kind::Int64);
        let float64 = prim(Kind::Float64);
        let string = prim(Kind::String);
        let bytes = prim(Kind::Bytes);
        // The sentinel types go into by_id (so spill decode resolves
        // them) but not into the lookup table, so interning an ordinary
        // error(string) can never alias them.
        let mut sentinel = |marker: Sentinel| {
            let typ = Type(Arc::new(TypeInner {
                id: by_id.len() as u32,
                kind: Kind::Error(string.clone()),
                sentinel: Some(marker),
            }));
            by_id.push(typ.clone());
            typ
        };
        let quiet = sentinel(Sentinel::Quiet);
        let missing = sentinel(Sentinel::Missing);
        Self {
            null,
            bool_,
            int64,
            float64,
            string,
            bytes,
            quiet,
            missing,
            inner: RwLock::new(ContextInner { by_id, lookup }),
        }
    }

    pub fn type_null(&self) -> Type {
        self.null.clone()
    }

    pub fn type_bool(&self) -> Type {
        self.bool_.clone()
    }

    pub fn type_int64(&self) -> Type {
        self.int64.clone()
    }

    pub fn type_float64(&self) -> Type {
        self.float64.clone()
    }

    pub fn type_string(&self) -> Type {
        self.string.clone()
    }

    pub fn type_bytes(&self) -> Type {
        self.bytes.clone()
    }

    pub(crate) fn type_quiet(&self) -> Type {
        self.quiet.clone()
    }

    pub(crate) fn type_missing(&self) -> Type {
        self.missing.clone()
    }

    /// Intern a record type with the given fields.
    pub fn lookup_record(&self, fields: Vec<Field>) -> Type {
        self.intern(Kind::Record(fields))
    }

    /// Intern a list type with the given element type.
    pub fn lookup_list(&self, elem: Type) -> Type {
        self.intern(Kind::List(elem))
    }

    /// Intern an error type wrapping the given inner type.
    pub fn lookup_error(&self, inner: Type) -> Type {
        self.intern(Kind::Error(inner))
    }

    /// Resolve a previously interned type by id, e.g. when decoding spill
    /// records.
    pub fn type_by_id(&self, id: u32) -> Option<Type> {
        self.inner.read().by_id.get(id as usize).cloned()
    }

    fn intern(&self, kind: Kind) -> Type {
        if let Some(typ) = self.inner.read().lookup.get(&kind) {
            return typ.clone();
        }
        let mut inner = self.inner.write();
        // A racing writer may have interned it between the locks.
        if let Some(typ) = inner.lookup.get(&kind) {
            return typ.clone();
        }
        let typ = Type(Arc::new(TypeInner {
            id: inner.by_id.len() as u32,
            kind: kind.clone(),
            sentinel: None,
        }));
        inner.by_id.push(typ.clone());
        inner.lookup.insert(kind, typ.clone());
        typ
    }
}

impl Default for TypeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TypeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("TypeContext")
            .field("types", &inner.by_id.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_ids_stable() {
        let ctx = TypeContext::new();
        assert_eq!(ctx.type_null().id(), 0);
        assert_eq!(ctx.type_int64().id(), 2);
        assert_eq!(ctx.type_int64(), ctx.type_int64());
        assert_ne!(ctx.type_int64(), ctx.type_string());
    }

    #[test]
    fn test_record_interning() {
        let ctx = TypeContext::new();
        let a = ctx.lookup_record(vec![Field::new("a", ctx.type_int64())]);
        let b = ctx.lookup_record(vec![Field::new("a", ctx.type_int64())]);
        let c = ctx.lookup_record(vec![Field::new("a", ctx.type_string())]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(ctx.type_by_id(a.id()), Some(a));
    }

    #[test]
    fn test_sentinel_types_never_alias_interned_errors() {
        let ctx = TypeContext::new();
        let err = ctx.lookup_error(ctx.type_string());
        assert_ne!(err, ctx.type_quiet());
        assert_ne!(err, ctx.type_missing());
        assert_ne!(ctx.type_quiet(), ctx.type_missing());
        assert!(err.sentinel().is_none());
        assert_eq!(ctx.type_quiet().sentinel(), Some(Sentinel::Quiet));
        // Spill decode still resolves the sentinel types by id.
        assert_eq!(ctx.type_by_id(ctx.type_missing().id()), Some(ctx.type_missing()));
    }

    #[test]
    fn test_nested_interning() {
        let ctx = TypeContext::new();
        let inner = ctx.lookup_record(vec![Field::new("x", ctx.type_float64())]);
        let list = ctx.lookup_list(inner.clone());
        let list2 = ctx.lookup_list(inner);
        assert_eq!(list, list2);
        let err = ctx.lookup_error(ctx.type_string());
        assert!(err.is_error());
    }
}
