//! Type-vector intern table
//!
//! Maps a sequence of types to a small dense integer, such that equal
//! sequences always map to the same integer. The aggregation operator keeps
//! two of these: one over key types (part of group identity) and one over
//! the combined key and aggregate output types (output record identity).

use super::Type;
use hashbrown::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct TypeVectorTable {
    vectors: Vec<Arc<[Type]>>,
    lookup: HashMap<Vec<u32>, usize>,
}

impl TypeVectorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the dense id for this sequence of types, assigning a new one
    /// on first sight.
    pub fn lookup(&mut self, types: &[Type]) -> usize {
        let key: Vec<u32> = types.iter().map(Type::id).collect();
        if let Some(&id) = self.lookup.get(&key) {
            return id;
        }
        let id = self.vectors.len();
        self.vectors.push(types.to_vec().into());
        self.lookup.insert(key, id);
        id
    }

    /// The type sequence previously assigned to `id`.
    pub fn types(&self, id: usize) -> &Arc<[Type]> {
        &self.vectors[id]
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeContext;

    #[test]
    fn test_lookup_stable() {
        let ctx = TypeContext::new();
        let mut table = TypeVectorTable::new();
        let id0 = table.lookup(&[ctx.type_int64(), ctx.type_string()]);
        let id1 = table.lookup(&[ctx.type_int64(), ctx.type_string()]);
        let id2 = table.lookup(&[ctx.type_string(), ctx.type_int64()]);
        assert_eq!(id0, id1);
        assert_ne!(id0, id2);
        assert_eq!(table.len(), 2);
        assert_eq!(table.types(id0).len(), 2);
    }

    #[test]
    fn test_empty_vector() {
        let ctx = TypeContext::new();
        let mut table = TypeVectorTable::new();
        let id = table.lookup(&[]);
        assert_eq!(id, table.lookup(&[]));
        assert_ne!(id, table.lookup(&[ctx.type_int64()]));
    }
}
