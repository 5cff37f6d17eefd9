//! Weighted choice of the next wrapper.

use std::sync::Arc;

use drift_types::Target;
use drift_wrappers::{Identifier, Registry, Wrapper};
use rand::seq::SliceRandom;
use rand::Rng;

/// How many times the previous wrapper enters the draw.
pub const REPEAT_WEIGHT: usize = 2;

/// Wrappers still eligible within one step.
pub struct Selector {
    pool: Vec<Arc<dyn Wrapper>>,
}

impl Selector {
    /// Enabled wrappers that support every target in use.
    pub fn for_targets(registry: &Registry, targets: &[Target]) -> Self {
        let pool = registry
            .wrappers()
            .filter(|wrapper| wrapper.enabled())
            .filter(|wrapper| targets.iter().all(|target| wrapper.supports(*target)))
            .cloned()
            .collect();
        Self { pool }
    }

    pub fn from_pool(pool: Vec<Arc<dyn Wrapper>>) -> Self {
        Self { pool }
    }

    /// Draws a wrapper. `previous` is entered [`REPEAT_WEIGHT`] times,
    /// every other candidate once.
    pub fn pick<R: Rng + ?Sized>(&self, previous: Option<&Identifier>, rng: &mut R) -> Option<Arc<dyn Wrapper>> {
        let mut draw: Vec<&Arc<dyn Wrapper>> = Vec::with_capacity(self.pool.len() + REPEAT_WEIGHT);
        for wrapper in &self.pool {
            let weight = if Some(&wrapper.identifier()) == previous {
                REPEAT_WEIGHT
            } else {
                1
            };
            draw.extend(std::iter::repeat(wrapper).take(weight));
        }
        draw.choose(rng).map(|wrapper| Arc::clone(wrapper))
    }

    /// Drops a candidate that reported it cannot execute.
    pub fn discard(&mut self, id: &Identifier) {
        self.pool.retain(|wrapper| &wrapper.identifier() != id);
    }

    pub fn identifiers(&self) -> Vec<Identifier> {
        self.pool.iter().map(|wrapper| wrapper.identifier()).collect()
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }
}
