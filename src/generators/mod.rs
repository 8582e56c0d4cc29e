//! Data generators feeding models from a pipeline instead of host arrays.
//!
//! A generator exposes its batches as op-graph nodes. Runs that fetch
//! anything depending on those nodes need no feeds; the executor pulls the
//! next element of the named pipeline itself.

use crate::asg::{DType, Shape};
use crate::tensor::{ContextRef, Tensor};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Source of named batch tensors.
pub trait Generator: fmt::Debug {
    /// Iterator outputs by key. Repeated calls return the same nodes.
    fn get_iterator(&self) -> BTreeMap<String, Tensor>;
}

/// Keys of the neural-render pipeline.
pub struct NNRIterator;

impl NNRIterator {
    pub const IMAGE: &'static str = "image";
    pub const UV_MAP: &'static str = "uv_map";
    pub const BIN_MASK: &'static str = "bin_mask";

    /// Generator yielding `[b, h, w, 3]` images, `[b, h, w, 2]` UV maps and
    /// `[b, h, w, 1]` binary masks from the pipeline `source`.
    pub fn generator(context: &ContextRef, source: &str, batch: usize, height: usize, width: usize) -> IteratorGenerator {
        IteratorGenerator::new(context, source)
            .with_key(Self::IMAGE, vec![batch, height, width, 3], DType::F32)
            .with_key(Self::UV_MAP, vec![batch, height, width, 2], DType::F32)
            .with_key(Self::BIN_MASK, vec![batch, height, width, 1], DType::F32)
    }
}

/// Generator over a pipeline whose elements are declared up front.
///
/// Iterator nodes are created on the first `get_iterator` call and cached.
pub struct IteratorGenerator {
    context: ContextRef,
    source: String,
    keys: BTreeMap<String, (Shape, DType)>,
    tensors: RefCell<Option<BTreeMap<String, Tensor>>>,
}

impl IteratorGenerator {
    pub fn new(context: &ContextRef, source: &str) -> Self {
        Self {
            context: Rc::clone(context),
            source: source.to_string(),
            keys: BTreeMap::new(),
            tensors: RefCell::new(None),
        }
    }

    pub fn with_key(mut self, key: &str, shape: Shape, dtype: DType) -> Self {
        self.keys.insert(key.to_string(), (shape, dtype));
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl Generator for IteratorGenerator {
    fn get_iterator(&self) -> BTreeMap<String, Tensor> {
        self.tensors
            .borrow_mut()
            .get_or_insert_with(|| {
                self.keys
                    .iter()
                    .map(|(key, (shape, dtype))| {
                        let t = Tensor::iterator_get_next(&self.context, &self.source, key, shape.clone(), *dtype);
                        (key.clone(), t)
                    })
                    .collect()
            })
            .clone()
    }
}

impl fmt::Debug for IteratorGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IteratorGenerator")
            .field("source", &self.source)
            .field("keys", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::GraphContext;

    #[test]
    fn iterator_nodes_are_created_once() {
        let ctx = GraphContext::new_ref();
        let gen = NNRIterator::generator(&ctx, "train", 4, 16, 16);
        let first = gen.get_iterator();
        let before = ctx.borrow().graph().len();
        let second = gen.get_iterator();
        assert_eq!(ctx.borrow().graph().len(), before);
        assert_eq!(first, second);
        assert_eq!(first[NNRIterator::IMAGE].shape(), Some(vec![4, 16, 16, 3]));
        assert_eq!(first[NNRIterator::BIN_MASK].shape(), Some(vec![4, 16, 16, 1]));
    }
}
