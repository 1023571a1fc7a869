//! Record builder
//!
//! Rebuilds output records from a fixed list of dotted field paths. The
//! builder is configured once with the flat leaf order (key paths followed
//! by aggregate output paths); at emit time the caller appends one payload
//! per leaf and the builder reassembles any nested record structure, both
//! for the encoded bytes and for the derived record type.

use crate::error::{EngineError, Result};
use crate::expr::FieldPath;
use crate::types::{Field, Type, TypeContext};
use crate::value::flat;
use bytes::Bytes;
use std::sync::Arc;

#[derive(Debug)]
struct Node {
    name: String,
    children: Vec<Node>,
}

impl Node {
    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

pub struct RecordBuilder {
    ctx: Arc<TypeContext>,
    roots: Vec<Node>,
    num_leaves: usize,
    appended: Vec<Option<Bytes>>,
}

impl RecordBuilder {
    /// Build from the flat list of output field paths. Paths sharing a
    /// prefix must be adjacent so the nested structure is well defined.
    pub fn new(ctx: Arc<TypeContext>, paths: &[FieldPath]) -> Result<Self> {
        let mut roots: Vec<Node> = Vec::new();
        for path in paths {
            let segs = path.segments();
            if segs.is_empty() {
                return Err(EngineError::Config("empty field path".into()));
            }
            insert(&mut roots, segs)?;
        }
        let num_leaves = count_leaves(&roots);
        Ok(Self {
            ctx,
            roots,
            num_leaves,
            appended: Vec::with_capacity(num_leaves),
        })
    }

    pub fn reset(&mut self) {
        self.appended.clear();
    }

    /// Append the payload for the next leaf in configured order.
    pub fn append(&mut self, val: Option<&[u8]>) {
        self.appended.push(val.map(Bytes::copy_from_slice));
    }

    /// Encode the appended leaves into a record payload.
    pub fn encode(&self) -> Result<Bytes> {
        if self.appended.len() != self.num_leaves {
            return Err(EngineError::Internal(format!(
                "record builder: appended {} of {} fields",
                self.appended.len(),
                self.num_leaves
            )));
        }
        let mut buf = Vec::new();
        let mut idx = 0;
        for node in &self.roots {
            encode_node(node, &self.appended, &mut idx, &mut buf);
        }
        Ok(buf.into())
    }

    /// Derive the record type for the given leaf types, in the same order
    /// the leaves are appended.
    pub fn record_type(&self, types: &[Type]) -> Result<Type> {
        if types.len() != self.num_leaves {
            return Err(EngineError::Internal(format!(
                "record builder: {} types for {} fields",
                types.len(),
                self.num_leaves
            )));
        }
        let mut idx = 0;
        let fields: Vec<Field> = self
            .roots
            .iter()
            .map(|n| type_node(&self.ctx, n, types, &mut idx))
            .collect();
        Ok(self.ctx.lookup_record(fields))
    }

    pub fn num_leaves(&self) -> usize {
        self.num_leaves
    }
}

fn insert(nodes: &mut Vec<Node>, segs: &[String]) -> Result<()> {
    let name = &segs[0];
    if let Some(pos) = nodes.iter().position(|n| n.name == *name) {
        if pos != nodes.len() - 1 {
            return Err(EngineError::Config(format!(
                "fields under \"{}\" must be adjacent",
                name
            )));
        }
        let node = &mut nodes[pos];
        if segs.len() == 1 || node.is_leaf() {
            return Err(EngineError::Config(format!(
                "duplicate or conflicting field path \"{}\"",
                name
            )));
        }
        return insert(&mut node.children, &segs[1..]);
    }
    let mut node = Node {
        name: name.clone(),
        children: Vec::new(),
    };
    let mut cur = &mut node;
    for seg in &segs[1..] {
        cur.children.push(Node {
            name: seg.clone(),
            children: Vec::new(),
        });
        cur = &mut cur.children[0];
    }
    nodes.push(node);
    Ok(())
}

fn count_leaves(nodes: &[Node]) -> usize {
    nodes
        .iter()
        .map(|n| {
            if n.is_leaf() {
                1
            } else {
                count_leaves(&n.children)
            }
        })
        .sum()
}

fn encode_node(node: &Node, appended: &[Option<Bytes>], idx: &mut usize, buf: &mut Vec<u8>) {
    if node.is_leaf() {
        flat::append(buf, appended[*idx].as_deref());
        *idx += 1;
        return;
    }
    let mut sub = Vec::new();
    for child in &node.children {
        encode_node(child, appended, idx, &mut sub);
    }
    flat::append(buf, Some(&sub));
}

fn type_node(ctx: &TypeContext, node: &Node, types: &[Type], idx: &mut usize) -> Field {
    if node.is_leaf() {
        let field = Field::new(node.name.clone(), types[*idx].clone());
        *idx += 1;
        return field;
    }
    let fields: Vec<Field> = node
        .children
        .iter()
        .map(|c| type_node(ctx, c, types, idx))
        .collect();
    Field::new(node.name.clone(), ctx.lookup_record(fields))
}
