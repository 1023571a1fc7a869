//! Self-describing values
//!
//! A `Value` is a type handle plus a flat-encoded payload. Payloads are
//! refcounted (`bytes::Bytes`), so values cheaply share storage with the
//! batch they were decoded from; `copy` detaches a value from any shared
//! storage.

pub mod builder;
pub mod flat;

pub use builder::RecordBuilder;

use crate::error::{EngineError, Result};
use crate::types::{Field, Kind, Sentinel, Type, TypeContext};
use bytes::Bytes;
use std::fmt;

#[derive(Clone, PartialEq, Eq)]
pub struct Value {
    typ: Type,
    bytes: Option<Bytes>,
}

impl Value {
    pub fn new(typ: Type, bytes: Option<Bytes>) -> Self {
        Self { typ, bytes }
    }

    pub fn null(typ: Type) -> Self {
        Self { typ, bytes: None }
    }

    pub fn bool(ctx: &TypeContext, v: bool) -> Self {
        Self {
            typ: ctx.type_bool(),
            bytes: Some(Bytes::copy_from_slice(&[v as u8])),
        }
    }

    pub fn int64(ctx: &TypeContext, v: i64) -> Self {
        let mut buf = Vec::with_capacity(10);
        flat::append_int64(&mut buf, v);
        Self {
            typ: ctx.type_int64(),
            bytes: Some(buf.into()),
        }
    }

    pub fn float64(ctx: &TypeContext, v: f64) -> Self {
        Self {
            typ: ctx.type_float64(),
            bytes: Some(Bytes::copy_from_slice(&v.to_le_bytes())),
        }
    }

    pub fn string(ctx: &TypeContext, v: impl AsRef<str>) -> Self {
        Self {
            typ: ctx.type_string(),
            bytes: Some(Bytes::copy_from_slice(v.as_ref().as_bytes())),
        }
    }

    /// An error value carrying a string message.
    pub fn error(ctx: &TypeContext, msg: impl AsRef<str>) -> Self {
        Self {
            typ: ctx.lookup_error(ctx.type_string()),
            bytes: Some(Bytes::copy_from_slice(msg.as_ref().as_bytes())),
        }
    }

    /// The sentinel meaning "this record contributes nothing"; skips the
    /// record entirely when produced by a key expression. Carried on a
    /// distinguished error type, so an ordinary error value whose message
    /// reads "quiet" is not mistaken for it.
    pub fn quiet(ctx: &TypeContext) -> Self {
        Self {
            typ: ctx.type_quiet(),
            bytes: Some(Bytes::from_static(b"quiet")),
        }
    }

    /// The sentinel for an absent field, likewise on its own type.
    pub fn missing(ctx: &TypeContext) -> Self {
        Self {
            typ: ctx.type_missing(),
            bytes: Some(Bytes::from_static(b"missing")),
        }
    }

    /// Compose a record value from named fields. The record type is
    /// interned in `ctx`.
    pub fn record(ctx: &TypeContext, fields: Vec<(&str, Value)>) -> Self {
        let mut buf = Vec::new();
        let mut typed = Vec::with_capacity(fields.len());
        for (name, val) in &fields {
            typed.push(Field::new(*name, val.typ.clone()));
            flat::append(&mut buf, val.bytes());
        }
        Self {
            typ: ctx.lookup_record(typed),
            bytes: Some(buf.into()),
        }
    }

    /// Compose a list value from same-typed elements.
    pub fn list(ctx: &TypeContext, elem: Type, items: &[Value]) -> Self {
        let mut buf = Vec::new();
        for item in items {
            flat::append(&mut buf, item.bytes());
        }
        Self {
            typ: ctx.lookup_list(elem),
            bytes: Some(buf.into()),
        }
    }

    pub fn typ(&self) -> &Type {
        &self.typ
    }

    /// The flat-encoded payload; `None` for null values.
    pub fn bytes(&self) -> Option<&[u8]> {
        self.bytes.as_deref()
    }

    pub fn is_null(&self) -> bool {
        self.bytes.is_none()
    }

    pub fn is_error(&self) -> bool {
        self.typ.is_error()
    }

    pub fn is_quiet(&self) -> bool {
        self.typ.sentinel() == Some(Sentinel::Quiet)
    }

    pub fn is_missing(&self) -> bool {
        self.typ.sentinel() == Some(Sentinel::Missing)
    }

    /// An owning copy detached from any shared batch storage.
    pub fn copy(&self) -> Self {
        Self {
            typ: self.typ.clone(),
            bytes: self.bytes.as_ref().map(|b| Bytes::copy_from_slice(b)),
        }
    }

    pub fn as_int64(&self) -> Result<i64> {
        match (self.typ.kind(), self.bytes()) {
            (Kind::Int64, Some(b)) => flat::decode_int64(b),
            _ => Err(EngineError::Evaluation(format!(
                "not an int64: {}",
                self.typ
            ))),
        }
    }

    pub fn as_float64(&self) -> Result<f64> {
        match (self.typ.kind(), self.bytes()) {
            (Kind::Float64, Some(b)) if b.len() == 8 => {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(b);
                Ok(f64::from_le_bytes(arr))
            }
            (Kind::Int64, Some(b)) => flat::decode_int64(b).map(|v| v as f64),
            _ => Err(EngineError::Evaluation(format!(
                "not a float64: {}",
                self.typ
            ))),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match (self.typ.kind(), self.bytes()) {
            (Kind::String, Some(b)) | (Kind::Error(_), Some(b)) => std::str::from_utf8(b)
                .map_err(|_| EngineError::Evaluation("invalid utf8 payload".into())),
            _ => Err(EngineError::Evaluation(format!(
                "not a string: {}",
                self.typ
            ))),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match (self.typ.kind(), self.bytes()) {
            (Kind::Bool, Some(b)) if b.len() == 1 => Ok(b[0] != 0),
            _ => Err(EngineError::Evaluation(format!("not a bool: {}", self.typ))),
        }
    }

    /// Decode the `idx`-th field of a record value without copying.
    pub fn field_at(&self, idx: usize) -> Result<Option<Value>> {
        let fields = match self.typ.fields() {
            Some(f) => f,
            None => return Ok(None),
        };
        let field = match fields.get(idx) {
            Some(f) => f,
            None => return Ok(None),
        };
        let payload = match &self.bytes {
            Some(b) => b,
            None => return Ok(Some(Value::null(field.typ.clone()))),
        };
        let mut it = flat::Iter::new(payload);
        for _ in 0..idx {
            it.next()?;
        }
        let item = it.next()?;
        Ok(Some(Value::new(
            field.typ.clone(),
            item.map(|sub| payload.slice_ref(sub)),
        )))
    }

    /// Decode the elements of a list value.
    pub fn elements(&self) -> Result<Vec<Value>> {
        let elem = self
            .typ
            .list_elem()
            .ok_or_else(|| EngineError::Evaluation(format!("not a list: {}", self.typ)))?
            .clone();
        let payload = match &self.bytes {
            Some(b) => b,
            None => return Ok(Vec::new()),
        };
        let mut out = Vec::new();
        let mut it = flat::Iter::new(payload);
        while !it.done() {
            let item = it.next()?;
            out.push(Value::new(
                elem.clone(),
                item.map(|sub| payload.slice_ref(sub)),
            ));
        }
        Ok(out)
    }
}

fn render(f: &mut fmt::Formatter<'_>, typ: &Type, bytes: Option<&[u8]>) -> fmt::Result {
    let payload = match bytes {
        Some(b) => b,
        None => return write!(f, "null"),
    };
    match typ.kind() {
        Kind::Null => write!(f, "null"),
        Kind::Bool => write!(f, "{}", payload.first().map(|b| *b != 0).unwrap_or(false)),
        Kind::Int64 => match flat::decode_int64(payload) {
            Ok(v) => write!(f, "{}", v),
            Err(_) => write!(f, "<bad int64>"),
        },
        Kind::Float64 => {
            if payload.len() == 8 {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(payload);
                write!(f, "{}", f64::from_le_bytes(arr))
            } else {
                write!(f, "<bad float64>")
            }
        }
        Kind::String => write!(f, "{:?}", String::from_utf8_lossy(payload)),
        Kind::Bytes => {
            write!(f, "0x")?;
            for b in payload {
                write!(f, "{:02x}", b)?;
            }
            Ok(())
        }
        Kind::Record(fields) => {
            write!(f, "{{")?;
            let mut it = flat::Iter::new(payload);
            for (i, fld) in fields.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{}:", fld.name)?;
                match it.next() {
                    Ok(item) => render(f, &fld.typ, item)?,
                    Err(_) => write!(f, "<bad field>")?,
                }
            }
            write!(f, "}}")
        }
        Kind::List(elem) => {
            write!(f, "[")?;
            let mut it = flat::Iter::new(payload);
            let mut first = true;
            while !it.done() {
                if !first {
                    write!(f, ",")?;
                }
                first = false;
                match it.next() {
                    Ok(item) => render(f, elem, item)?,
                    Err(_) => {
                        write!(f, "<bad item>")?;
                        break;
                    }
                }
            }
            write!(f, "]")
        }
        Kind::Error(inner) => {
            write!(f, "error(")?;
            render(f, inner, Some(payload))?;
            write!(f, ")")
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        render(f, &self.typ, self.bytes())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        render(f, &self.typ, self.bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_roundtrip() {
        let ctx = TypeContext::new();
        assert_eq!(Value::int64(&ctx, -7).as_int64().unwrap(), -7);
        assert_eq!(Value::float64(&ctx, 2.5).as_float64().unwrap(), 2.5);
        assert_eq!(Value::string(&ctx, "hi").as_str().unwrap(), "hi");
        assert!(Value::bool(&ctx, true).as_bool().unwrap());
        assert!(Value::null(ctx.type_int64()).is_null());
    }

    #[test]
    fn test_sentinels() {
        let ctx = TypeContext::new();
        assert!(Value::quiet(&ctx).is_quiet());
        assert!(Value::missing(&ctx).is_missing());
        assert!(Value::quiet(&ctx).is_error());
        assert!(!Value::quiet(&ctx).is_missing());
    }

    #[test]
    fn test_error_text_does_not_make_a_sentinel() {
        let ctx = TypeContext::new();
        // An ordinary error may legitimately word its message like a
        // sentinel; only the distinguished types signal.
        let quiet_text = Value::error(&ctx, "quiet");
        let missing_text = Value::error(&ctx, "missing");
        assert!(quiet_text.is_error() && !quiet_text.is_quiet());
        assert!(missing_text.is_error() && !missing_text.is_missing());
        assert_ne!(quiet_text.typ(), Value::quiet(&ctx).typ());
    }

    #[test]
    fn test_record_fields() {
        let ctx = TypeContext::new();
        let rec = Value::record(
            &ctx,
            vec![
                ("a", Value::int64(&ctx, 1)),
                ("b", Value::string(&ctx, "x")),
            ],
        );
        let a = rec.field_at(0).unwrap().unwrap();
        let b = rec.field_at(1).unwrap().unwrap();
        assert_eq!(a.as_int64().unwrap(), 1);
        assert_eq!(b.as_str().unwrap(), "x");
        assert!(rec.field_at(2).unwrap().is_none());
    }

    #[test]
    fn test_list_elements() {
        let ctx = TypeContext::new();
        let items = vec![Value::int64(&ctx, 1), Value::int64(&ctx, 2)];
        let list = Value::list(&ctx, ctx.type_int64(), &items);
        let back = list.elements().unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[1].as_int64().unwrap(), 2);
    }

    #[test]
    fn test_copy_detaches() {
        let ctx = TypeContext::new();
        let v = Value::string(&ctx, "payload");
        let c = v.copy();
        assert_eq!(v, c);
    }
}
