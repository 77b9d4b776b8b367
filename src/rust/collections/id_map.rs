// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::rand::{
    rngs::SmallRng,
    RngCore,
    SeedableRng,
};
use ::std::{
    collections::HashMap,
    hash::Hash,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Seed for the random number generator used to allocate external ids.
/// This value was chosen arbitrarily.
const ID_SEED: u64 = 42;

/// Maximum number of attempts at drawing an unused external id.
const MAX_RETRIES_ID_ALLOC: usize = 500;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Obfuscating map from externally visible ids to internal storage slots. External ids are drawn at random so that
/// callers cannot guess slot numbers or observe allocation order.
pub struct IdMap<E: Eq + Hash + From<u64> + Copy> {
    /// Map between external ids and internal slots.
    ids: HashMap<E, usize>,
    /// Small random number generator for external ids.
    rng: SmallRng,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<E: Eq + Hash + From<u64> + Copy> IdMap<E> {
    /// Retrieves the slot mapped to this external id, if it exists.
    pub fn get(&self, external_id: &E) -> Option<usize> {
        self.ids.get(external_id).copied()
    }

    /// Removes the mapping for this external id, returning the slot it mapped to.
    pub fn remove(&mut self, external_id: &E) -> Option<usize> {
        self.ids.remove(external_id)
    }

    /// Allocates a fresh external id and maps it to `slot`. If a drawn id is in use, keep drawing until an unused one
    /// is found (up to a maximum number of tries).
    pub fn insert_with_new_id(&mut self, slot: usize) -> E {
        for _ in 0..MAX_RETRIES_ID_ALLOC {
            let external_id: E = E::from(self.rng.next_u64());
            if !self.ids.contains_key(&external_id) {
                self.ids.insert(external_id, slot);
                return external_id;
            }
        }
        panic!("could not find an unused external id");
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.ids.len()
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Default Trait Implementation for IdMap
impl<E: Eq + Hash + From<u64> + Copy> Default for IdMap<E> {
    fn default() -> Self {
        Self {
            ids: HashMap::<E, usize>::new(),
            rng: SmallRng::seed_from_u64(ID_SEED),
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
