//! Id-keyed bulk data access.
//!
//! Training and validation sets each get their own loader instance; the two id
//! universes need not even be the same Rust type.

use anyhow::Result;

/// Ordered, id-keyed bulk fetch over a training or validation collection.
#[allow(async_fn_in_trait)]
pub trait DataLoader<Id, Instance> {
    /// The full, stably-ordered id universe. Ordering matters: batch samplers index
    /// into it positionally.
    fn all_ids(&self) -> &[Id];

    /// Fetches instances for `ids`, preserving order and cardinality.
    async fn fetch(&self, ids: &[Id]) -> Result<Vec<Instance>>;

    fn len(&self) -> usize {
        self.all_ids().len()
    }

    fn is_empty(&self) -> bool {
        self.all_ids().is_empty()
    }
}

/// Default loader: a `Vec<Instance>` keyed by dense `usize` ids in insertion order.
/// Deterministic and dependency-free — the loader most adapters reach for first.
#[derive(Debug, Clone)]
pub struct InMemoryDataLoader<Instance> {
    ids: Vec<usize>,
    instances: Vec<Instance>,
}

impl<Instance> InMemoryDataLoader<Instance> {
    pub fn new(instances: Vec<Instance>) -> Self {
        let ids = (0..instances.len()).collect();
        Self { ids, instances }
    }
}

impl<Instance> DataLoader<usize, Instance> for InMemoryDataLoader<Instance>
where
    Instance: Clone,
{
    fn all_ids(&self) -> &[usize] {
        &self.ids
    }

    async fn fetch(&self, ids: &[usize]) -> Result<Vec<Instance>> {
        ids.iter()
            .map(|&id| {
                self.instances
                    .get(id)
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("no instance for id {id}"))
            })
            .collect()
    }
}
