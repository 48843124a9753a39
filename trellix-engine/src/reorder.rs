//! Reorder engine - turns a move instruction into the rank updates that realize it
//!
//! Every reorder renumbers the affected containers to dense ranks `0..n-1`,
//! so ranks never collide no matter how the sequence was left by earlier
//! writes. Only entities whose rank or owner actually changes get an update.
//! A cross-list move renumbers the source list as well as the destination.

use crate::error::{BoardError, Result};
use crate::store::EntityStore;
use crate::types::{CardId, ContainerId, EntityKey, ListId};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A resolved drag outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Instruction {
    /// Move a list to `to_index` among its board's lists
    ReorderList { list: ListId, to_index: usize },
    /// Move a card to `to_index` in `to_list`, or to its end when `None`.
    /// `to_list` may be the card's current list.
    MoveCard {
        card: CardId,
        to_list: ListId,
        to_index: Option<usize>,
    },
}

impl Instruction {
    pub fn reorder_list(list: impl Into<ListId>, to_index: usize) -> Self {
        Self::ReorderList {
            list: list.into(),
            to_index,
        }
    }

    pub fn move_card(card: impl Into<CardId>, to_list: impl Into<ListId>, to_index: usize) -> Self {
        Self::MoveCard {
            card: card.into(),
            to_list: to_list.into(),
            to_index: Some(to_index),
        }
    }

    pub fn append_card(card: impl Into<CardId>, to_list: impl Into<ListId>) -> Self {
        Self::MoveCard {
            card: card.into(),
            to_list: to_list.into(),
            to_index: None,
        }
    }

    /// The entity being moved
    pub fn subject(&self) -> EntityKey {
        match self {
            Self::ReorderList { list, .. } => EntityKey::List(list.clone()),
            Self::MoveCard { card, .. } => EntityKey::Card(card.clone()),
        }
    }
}

/// New rank (and possibly new owner) for one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankUpdate {
    pub key: EntityKey,
    pub container: ContainerId,
    pub order: usize,
}

/// The full effect of one move, applied by [`EntityStore::apply_plan`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorderPlan {
    pub moved: EntityKey,
    pub source: ContainerId,
    pub destination: ContainerId,
    /// Final rank of the moved entity
    pub order: usize,
    pub updates: Vec<RankUpdate>,
    /// Children of the destination after the move, in order
    pub destination_order: Vec<EntityKey>,
    /// Children of the source after the move, for cross-container moves
    pub source_order: Option<Vec<EntityKey>>,
}

impl ReorderPlan {
    pub fn is_cross_container(&self) -> bool {
        self.source != self.destination
    }
}

/// Compute the plan for `instruction` against the current store.
///
/// Returns `Ok(None)` when the move would leave every sequence unchanged,
/// in which case nothing must be written.
pub fn plan(store: &EntityStore, instruction: &Instruction) -> Result<Option<ReorderPlan>> {
    let subject = instruction.subject();
    let (source, from) = store
        .position_of(&subject)
        .ok_or_else(|| BoardError::not_found(subject.kind().as_str(), subject.id_str()))?;

    let (destination, to_index) = match instruction {
        Instruction::ReorderList { to_index, .. } => (source.clone(), Some(*to_index)),
        Instruction::MoveCard {
            to_list, to_index, ..
        } => {
            if store.list(to_list).is_none() {
                return Err(BoardError::not_found("list", to_list.as_str()));
            }
            (ContainerId::List(to_list.clone()), *to_index)
        }
    };

    let plan = if destination == source {
        reorder_within(store, subject, source, from, to_index)
    } else {
        Some(move_across(store, subject, source, destination, to_index))
    };

    match &plan {
        Some(p) => debug!(
            entity = %p.moved,
            from = %p.source,
            to = %p.destination,
            order = p.order,
            writes = p.updates.len(),
            "planned reorder"
        ),
        None => debug!(entity = %instruction.subject(), "reorder is a no-op"),
    }
    Ok(plan)
}

/// Remove the element at `from` and reinsert it at `to` of the remaining
/// sequence, clamping `to` to `[0, len]`.
pub fn splice<T: Clone>(seq: &[T], from: usize, to: usize) -> Vec<T> {
    let mut out = seq.to_vec();
    if from >= out.len() {
        return out;
    }
    let item = out.remove(from);
    let to = to.min(out.len());
    out.insert(to, item);
    out
}

fn reorder_within(
    store: &EntityStore,
    subject: EntityKey,
    container: ContainerId,
    from: usize,
    to_index: Option<usize>,
) -> Option<ReorderPlan> {
    let current = store.list_container(&container);
    let to = to_index.unwrap_or(current.len().saturating_sub(1));
    let reordered = splice(&current, from, to);
    if reordered == current {
        return None;
    }

    let updates = renumber(store, &container, &reordered);
    let order = index_of(&reordered, &subject);
    Some(ReorderPlan {
        moved: subject,
        source: container.clone(),
        destination: container,
        order,
        updates,
        destination_order: reordered,
        source_order: None,
    })
}

fn move_across(
    store: &EntityStore,
    subject: EntityKey,
    source: ContainerId,
    destination: ContainerId,
    to_index: Option<usize>,
) -> ReorderPlan {
    let remaining: Vec<EntityKey> = store
        .list_container(&source)
        .into_iter()
        .filter(|k| k != &subject)
        .collect();

    let mut target = store.list_container(&destination);
    let to = to_index.unwrap_or(target.len()).min(target.len());
    target.insert(to, subject.clone());

    let mut updates = renumber(store, &source, &remaining);
    updates.extend(renumber(store, &destination, &target));

    ReorderPlan {
        moved: subject,
        source,
        destination,
        order: to,
        updates,
        destination_order: target,
        source_order: Some(remaining),
    }
}

/// Dense ranks for `sequence` inside `container`, keeping only entries whose
/// rank or container differs from the store.
fn renumber(store: &EntityStore, container: &ContainerId, sequence: &[EntityKey]) -> Vec<RankUpdate> {
    sequence
        .iter()
        .enumerate()
        .filter(|(index, key)| {
            store.get(key).map_or(true, |entity| {
                entity.order() != Some(*index) || entity.container().as_ref() != Some(container)
            })
        })
        .map(|(index, key)| RankUpdate {
            key: key.clone(),
            container: container.clone(),
            order: index,
        })
        .collect()
}

fn index_of(sequence: &[EntityKey], key: &EntityKey) -> usize {
    sequence.iter().position(|k| k == key).unwrap_or(0)
}
