//! Foreign-key bridge from a sub-entity key to its owning entity.

use std::collections::HashMap;

use thiserror::Error;

use crate::frame::{EntityId, Frame, FrameError};

/// Owner assigned to rows whose sub-entity key is unknown or missing.
pub const UNMAPPED_ENTITY: EntityId = 0;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BridgeError {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("sub-entity {sub_id} is owned by both {first} and {second}")]
    ConflictingOwner {
        sub_id: EntityId,
        first: EntityId,
        second: EntityId,
    },
}

#[derive(Debug, Clone, Default)]
pub struct ForeignKeyBridge {
    owners: HashMap<EntityId, EntityId>,
}

/// Entity ids resolved for every row, plus how many fell back to the sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub entity_ids: Vec<EntityId>,
    pub unmapped: usize,
}

impl ForeignKeyBridge {
    /// Builds the mapping from (sub id, owner id) pairs.
    ///
    /// Repeated identical pairs are accepted; a sub id mapped to two different
    /// owners is rejected.
    pub fn from_pairs(
        pairs: impl IntoIterator<Item = (EntityId, EntityId)>,
    ) -> Result<Self, BridgeError> {
        let mut owners = HashMap::new();
        for (sub_id, owner) in pairs {
            match owners.insert(sub_id, owner) {
                Some(first) if first != owner => {
                    return Err(BridgeError::ConflictingOwner {
                        sub_id,
                        first,
                        second: owner,
                    });
                }
                _ => {}
            }
        }
        Ok(Self { owners })
    }

    /// Reads the mapping from two key columns of the owning table. Rows where
    /// either key is missing contribute nothing.
    pub fn from_frame(frame: &Frame, sub_key: &str, entity_key: &str) -> Result<Self, BridgeError> {
        let subs = frame.entity_key(sub_key)?;
        let owners = frame.entity_key(entity_key)?;
        Self::from_pairs(
            subs.into_iter()
                .zip(owners)
                .filter_map(|(sub, owner)| Some((sub?, owner?))),
        )
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn owner_of(&self, sub_id: EntityId) -> Option<EntityId> {
        self.owners.get(&sub_id).copied()
    }

    /// Resolves every row; unknown or missing sub ids map to [`UNMAPPED_ENTITY`].
    pub fn resolve(&self, sub_ids: &[Option<EntityId>]) -> Resolution {
        let mut unmapped = 0;
        let entity_ids = sub_ids
            .iter()
            .map(|sub| match sub.and_then(|id| self.owner_of(id)) {
                Some(owner) => owner,
                None => {
                    unmapped += 1;
                    UNMAPPED_ENTITY
                }
            })
            .collect();
        Resolution {
            entity_ids,
            unmapped,
        }
    }
}
