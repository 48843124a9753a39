//! EntityStore - the in-memory source of truth for boards, lists and cards
//!
//! Reads are by-container filters sorted by `order`. Every write funnels
//! through one private `commit`, which stamps the touched entities and their
//! containers with a monotonically increasing version and returns a
//! [`Change`] holding the before-images needed to undo it. Writes are
//! validated in full before anything is mutated, so a rejected write leaves
//! the store untouched.

use crate::error::{BoardError, Result};
use crate::reorder::ReorderPlan;
use crate::types::{
    Board, BoardId, Card, CardId, ContainerId, Entity, EntityKey, EntityPatch, List, ListId,
    UserId,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

/// Everything the store holds, without version bookkeeping.
///
/// Collections are sorted by id so two snapshots of equal content compare
/// equal regardless of insertion history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub boards: Vec<Board>,
    #[serde(default)]
    pub lists: Vec<List>,
    #[serde(default)]
    pub cards: Vec<Card>,
}

/// The record of one committed write
#[derive(Debug, Clone)]
pub struct Change {
    stamp: u64,
    /// Entity state before the write; `None` means the entity did not exist
    before: Vec<(EntityKey, Option<Entity>)>,
    containers: Vec<ContainerId>,
}

impl Change {
    /// Version stamp assigned by the commit
    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    /// Entities written by the commit
    pub fn touched(&self) -> impl Iterator<Item = &EntityKey> {
        self.before.iter().map(|(key, _)| key)
    }

    /// Containers whose child set or ranks the commit affected
    pub fn containers(&self) -> &[ContainerId] {
        &self.containers
    }

    /// State of an entity before the commit
    pub fn before(&self, key: &EntityKey) -> Option<&Entity> {
        self.before
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, prior)| prior.as_ref())
    }
}

enum Write {
    Put(Entity),
    Remove(EntityKey),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Versioned {
    Entity(EntityKey),
    Container(ContainerId),
}

/// In-memory store of boards, lists and cards
#[derive(Debug, Default)]
pub struct EntityStore {
    boards: IndexMap<BoardId, Board>,
    lists: IndexMap<ListId, List>,
    cards: IndexMap<CardId, Card>,
    versions: HashMap<Versioned, u64>,
    stamp: u64,
}

impl EntityStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from loaded collections, replacing any session content.
    ///
    /// Every list must reference a loaded board, every card a loaded list,
    /// and ranks must be unique per container.
    pub fn load(boards: Vec<Board>, lists: Vec<List>, cards: Vec<Card>) -> Result<Self> {
        let mut store = Self::new();
        for board in boards {
            store.boards.insert(board.id.clone(), board);
        }
        for list in lists {
            if !store.boards.contains_key(&list.board_id) {
                return Err(BoardError::not_found("board", list.board_id.as_str()));
            }
            store.lists.insert(list.id.clone(), list);
        }
        for card in cards {
            if !store.lists.contains_key(&card.list_id) {
                return Err(BoardError::not_found("list", card.list_id.as_str()));
            }
            store.cards.insert(card.id.clone(), card);
        }
        store.check_invariants().map_err(BoardError::validation)?;
        debug!(
            boards = store.boards.len(),
            lists = store.lists.len(),
            cards = store.cards.len(),
            "loaded entity store"
        );
        Ok(store)
    }

    /// Rebuild a store from a snapshot
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Result<Self> {
        Self::load(snapshot.boards, snapshot.lists, snapshot.cards)
    }

    /// Copy out the full content
    pub fn snapshot(&self) -> StoreSnapshot {
        let mut boards: Vec<Board> = self.boards.values().cloned().collect();
        let mut lists: Vec<List> = self.lists.values().cloned().collect();
        let mut cards: Vec<Card> = self.cards.values().cloned().collect();
        boards.sort_by(|a, b| a.id.cmp(&b.id));
        lists.sort_by(|a, b| a.id.cmp(&b.id));
        cards.sort_by(|a, b| a.id.cmp(&b.id));
        StoreSnapshot {
            boards,
            lists,
            cards,
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn board(&self, id: &BoardId) -> Option<&Board> {
        self.boards.get(id)
    }

    pub fn list(&self, id: &ListId) -> Option<&List> {
        self.lists.get(id)
    }

    pub fn card(&self, id: &CardId) -> Option<&Card> {
        self.cards.get(id)
    }

    /// Clone out any entity by key
    pub fn get(&self, key: &EntityKey) -> Option<Entity> {
        match key {
            EntityKey::Board(id) => self.boards.get(id).cloned().map(Entity::Board),
            EntityKey::List(id) => self.lists.get(id).cloned().map(Entity::List),
            EntityKey::Card(id) => self.cards.get(id).cloned().map(Entity::Card),
        }
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        match key {
            EntityKey::Board(id) => self.boards.contains_key(id),
            EntityKey::List(id) => self.lists.contains_key(id),
            EntityKey::Card(id) => self.cards.contains_key(id),
        }
    }

    pub fn contains_container(&self, container: &ContainerId) -> bool {
        match container {
            ContainerId::Board(id) => self.boards.contains_key(id),
            ContainerId::List(id) => self.lists.contains_key(id),
        }
    }

    /// Boards owned by `owner`, newest first
    pub fn boards_for(&self, owner: &UserId) -> Vec<&Board> {
        let mut boards: Vec<&Board> = self
            .boards
            .values()
            .filter(|b| &b.owner_id == owner)
            .collect();
        boards.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        boards
    }

    /// Lists of a board in ascending order. Empty if the board has none.
    pub fn lists_in(&self, board: &BoardId) -> Vec<&List> {
        let mut lists: Vec<&List> = self
            .lists
            .values()
            .filter(|l| &l.board_id == board)
            .collect();
        lists.sort_by_key(|l| l.order);
        lists
    }

    /// Cards of a list in ascending order. Empty if the list has none.
    pub fn cards_in(&self, list: &ListId) -> Vec<&Card> {
        let mut cards: Vec<&Card> = self
            .cards
            .values()
            .filter(|c| &c.list_id == list)
            .collect();
        cards.sort_by_key(|c| c.order);
        cards
    }

    /// Children of any container as keys, in ascending order
    pub fn list_container(&self, container: &ContainerId) -> Vec<EntityKey> {
        match container {
            ContainerId::Board(id) => self
                .lists_in(id)
                .into_iter()
                .map(|l| EntityKey::List(l.id.clone()))
                .collect(),
            ContainerId::List(id) => self
                .cards_in(id)
                .into_iter()
                .map(|c| EntityKey::Card(c.id.clone()))
                .collect(),
        }
    }

    /// Container and zero-based index of an entity
    pub fn position_of(&self, key: &EntityKey) -> Option<(ContainerId, usize)> {
        let container = self.get(key)?.container()?;
        let index = self.list_container(&container).iter().position(|k| k == key)?;
        Some((container, index))
    }

    /// Rank for a child appended to the end of `container`.
    ///
    /// Equals the sibling count while the container is dense, and stays past
    /// the highest rank when a deletion has left a gap.
    pub fn next_order(&self, container: &ContainerId) -> usize {
        self.ranks_in(container)
            .into_iter()
            .map(|(_, order)| order + 1)
            .max()
            .unwrap_or(0)
    }

    /// Current version of an entity; zero if it was never written in this session
    pub fn version_of(&self, key: &EntityKey) -> u64 {
        self.versions
            .get(&Versioned::Entity(key.clone()))
            .copied()
            .unwrap_or(0)
    }

    /// Whether anything the change touched has been written again since
    pub fn is_superseded(&self, change: &Change) -> bool {
        let entity_moved = change
            .touched()
            .any(|key| self.version(&Versioned::Entity(key.clone())) > change.stamp);
        let container_moved = change
            .containers
            .iter()
            .any(|c| self.version(&Versioned::Container(c.clone())) > change.stamp);
        entity_moved || container_moved
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert a new entity.
    ///
    /// Lists and cards are appended to the end of their container unless an
    /// explicit `order` is supplied, which must not collide with a sibling.
    pub fn apply_create(&mut self, mut entity: Entity, order: Option<usize>) -> Result<Change> {
        let key = entity.key();
        if self.contains(&key) {
            return Err(BoardError::validation(format!("{} already exists", key)));
        }
        if let Some(container) = entity.container() {
            if !self.contains_container(&container) {
                return Err(container_not_found(&container));
            }
            let rank = order.unwrap_or_else(|| self.next_order(&container));
            match &mut entity {
                Entity::List(list) => list.order = rank,
                Entity::Card(card) => card.order = rank,
                Entity::Board(_) => {}
            }
        }
        self.validated_commit(vec![Write::Put(entity)])
    }

    /// Merge a field patch into an existing entity.
    ///
    /// Rejects a patch whose `order` is already held by a sibling; coordinated
    /// renumbering goes through [`EntityStore::apply_plan`] instead.
    pub fn apply_patch(&mut self, patch: &EntityPatch) -> Result<Change> {
        let mut entity = self
            .get(&patch.key())
            .ok_or_else(|| entity_not_found(&patch.key()))?;
        match (patch, &mut entity) {
            (EntityPatch::Board { patch, .. }, Entity::Board(board)) => patch.merge_into(board),
            (EntityPatch::List { patch, .. }, Entity::List(list)) => patch.merge_into(list),
            (EntityPatch::Card { patch, .. }, Entity::Card(card)) => patch.merge_into(card),
            _ => unreachable!("patch key and entity kind always agree"),
        }
        self.validated_commit(vec![Write::Put(entity)])
    }

    /// Delete an entity and everything it owns in one commit.
    ///
    /// Deleting a list removes its cards; deleting a board removes its lists
    /// and their cards.
    pub fn apply_delete(&mut self, key: &EntityKey) -> Result<Change> {
        if !self.contains(key) {
            return Err(entity_not_found(key));
        }

        let mut doomed_lists: Vec<ListId> = Vec::new();
        let mut writes = Vec::new();
        match key {
            EntityKey::Board(id) => {
                doomed_lists.extend(self.lists_in(id).into_iter().map(|l| l.id.clone()));
            }
            EntityKey::List(id) => doomed_lists.push(id.clone()),
            EntityKey::Card(_) => {}
        }
        for list in &doomed_lists {
            writes.extend(
                self.cards_in(list)
                    .into_iter()
                    .map(|c| Write::Remove(EntityKey::Card(c.id.clone()))),
            );
        }
        if let EntityKey::Board(_) = key {
            writes.extend(
                doomed_lists
                    .iter()
                    .map(|l| Write::Remove(EntityKey::List(l.clone()))),
            );
        }
        writes.push(Write::Remove(key.clone()));

        debug!(entity = %key, cascade = writes.len() - 1, "deleting entity");
        Ok(self.commit(writes))
    }

    /// Apply a reorder plan as one composite write: owner reassignment and
    /// renumbering of every affected container land under a single stamp.
    pub fn apply_plan(&mut self, plan: &ReorderPlan) -> Result<Change> {
        let mut writes = Vec::with_capacity(plan.updates.len());
        for update in &plan.updates {
            let mut entity = self
                .get(&update.key)
                .ok_or_else(|| entity_not_found(&update.key))?;
            if !self.contains_container(&update.container) {
                return Err(container_not_found(&update.container));
            }
            match (&mut entity, &update.container) {
                (Entity::List(list), ContainerId::Board(board)) => {
                    if &list.board_id != board {
                        return Err(BoardError::validation(format!(
                            "list {} cannot move to board {}",
                            list.id, board
                        )));
                    }
                    list.order = update.order;
                }
                (Entity::Card(card), ContainerId::List(list)) => {
                    card.list_id = list.clone();
                    card.order = update.order;
                }
                _ => {
                    return Err(BoardError::validation(format!(
                        "{} cannot be ranked in {}",
                        update.key, update.container
                    )))
                }
            }
            writes.push(Write::Put(entity));
        }
        self.validated_commit(writes)
    }

    /// Put every entity a change touched back to its before-image.
    ///
    /// Callers check [`EntityStore::is_superseded`] first; restoring a
    /// superseded change could clobber newer state.
    pub fn restore(&mut self, change: &Change) -> Change {
        let writes = change
            .before
            .iter()
            .rev()
            .map(|(key, prior)| match prior {
                Some(entity) => Write::Put(entity.clone()),
                None => Write::Remove(key.clone()),
            })
            .collect();
        debug!(stamp = change.stamp, "restoring before-images");
        self.commit(writes)
    }

    /// Verify rank uniqueness and ownership. Returns a description of the
    /// first violation found.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        for list in self.lists.values() {
            if !self.boards.contains_key(&list.board_id) {
                return Err(format!("list {} references missing board {}", list.id, list.board_id));
            }
        }
        for card in self.cards.values() {
            if !self.lists.contains_key(&card.list_id) {
                return Err(format!("card {} references missing list {}", card.id, card.list_id));
            }
        }
        let containers = self
            .boards
            .keys()
            .map(|b| ContainerId::Board(b.clone()))
            .chain(self.lists.keys().map(|l| ContainerId::List(l.clone())));
        for container in containers {
            let mut seen = HashSet::new();
            for (key, order) in self.ranks_in(&container) {
                if !seen.insert(order) {
                    return Err(format!("{} shares order {} in {}", key, order, container));
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn version(&self, key: &Versioned) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn ranks_in(&self, container: &ContainerId) -> Vec<(EntityKey, usize)> {
        match container {
            ContainerId::Board(id) => self
                .lists
                .values()
                .filter(|l| &l.board_id == id)
                .map(|l| (EntityKey::List(l.id.clone()), l.order))
                .collect(),
            ContainerId::List(id) => self
                .cards
                .values()
                .filter(|c| &c.list_id == id)
                .map(|c| (EntityKey::Card(c.id.clone()), c.order))
                .collect(),
        }
    }

    /// Check that the post-write state of every affected container keeps
    /// ranks unique, then commit.
    fn validated_commit(&mut self, writes: Vec<Write>) -> Result<Change> {
        let mut incoming: HashMap<ContainerId, Vec<(EntityKey, usize)>> = HashMap::new();
        let mut overwritten: HashSet<EntityKey> = HashSet::new();
        for write in &writes {
            if let Write::Put(entity) = write {
                let key = entity.key();
                if let (Some(container), Some(order)) = (entity.container(), entity.order()) {
                    incoming.entry(container).or_default().push((key.clone(), order));
                }
                overwritten.insert(key);
            }
        }

        for (container, puts) in &incoming {
            let mut held: HashMap<usize, EntityKey> = self
                .ranks_in(container)
                .into_iter()
                .filter(|(key, _)| !overwritten.contains(key))
                .map(|(key, order)| (order, key))
                .collect();
            for (key, order) in puts {
                if let Some(holder) = held.insert(*order, key.clone()) {
                    return Err(BoardError::validation(format!(
                        "order {} in {} is already held by {}",
                        order, container, holder
                    )));
                }
            }
        }

        Ok(self.commit(writes))
    }

    fn commit(&mut self, writes: Vec<Write>) -> Change {
        self.stamp += 1;
        let stamp = self.stamp;
        let mut before = Vec::with_capacity(writes.len());
        let mut containers: Vec<ContainerId> = Vec::new();

        for write in writes {
            let key = match &write {
                Write::Put(entity) => entity.key(),
                Write::Remove(key) => key.clone(),
            };
            let prior = self.get(&key);

            // Creating or removing a board or list also affects it as a
            // container, so later writes to its children supersede this one
            let lifecycle = prior.is_none() || matches!(write, Write::Remove(_));
            for container in [
                prior.as_ref().and_then(Entity::container),
                match &write {
                    Write::Put(entity) => entity.container(),
                    Write::Remove(_) => None,
                },
                key.as_container().filter(|_| lifecycle),
            ]
            .into_iter()
            .flatten()
            {
                if !containers.contains(&container) {
                    containers.push(container);
                }
            }

            match write {
                Write::Put(Entity::Board(b)) => {
                    self.boards.insert(b.id.clone(), b);
                }
                Write::Put(Entity::List(l)) => {
                    self.lists.insert(l.id.clone(), l);
                }
                Write::Put(Entity::Card(c)) => {
                    self.cards.insert(c.id.clone(), c);
                }
                Write::Remove(EntityKey::Board(id)) => {
                    self.boards.shift_remove(&id);
                }
                Write::Remove(EntityKey::List(id)) => {
                    self.lists.shift_remove(&id);
                }
                Write::Remove(EntityKey::Card(id)) => {
                    self.cards.shift_remove(&id);
                }
            }

            trace!(entity = %key, stamp, "wrote entity");
            self.versions.insert(Versioned::Entity(key.clone()), stamp);
            before.push((key, prior));
        }

        for container in &containers {
            self.versions
                .insert(Versioned::Container(container.clone()), stamp);
        }

        debug_assert!(
            self.check_invariants().is_ok(),
            "store invariant violated: {:?}",
            self.check_invariants()
        );

        Change {
            stamp,
            before,
            containers,
        }
    }
}

fn entity_not_found(key: &EntityKey) -> BoardError {
    BoardError::not_found(key.kind().as_str(), key.id_str())
}

fn container_not_found(container: &ContainerId) -> BoardError {
    match container {
        ContainerId::Board(id) => BoardError::not_found("board", id.as_str()),
        ContainerId::List(id) => BoardError::not_found("list", id.as_str()),
    }
}
