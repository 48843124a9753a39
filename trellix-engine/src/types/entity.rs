//! Kind-erased handles over boards, lists and cards

use super::board::{Board, BoardPatch, List, ListPatch};
use super::card::{Card, CardPatch};
use super::ids::{BoardId, CardId, ListId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The three ranked entity kinds the engine stores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Board,
    List,
    Card,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Board => "board",
            Self::List => "list",
            Self::Card => "card",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed reference to one stored entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityKey {
    Board(BoardId),
    List(ListId),
    Card(CardId),
}

impl EntityKey {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        match kind {
            EntityKind::Board => Self::Board(BoardId::from_string(id)),
            EntityKind::List => Self::List(ListId::from_string(id)),
            EntityKind::Card => Self::Card(CardId::from_string(id)),
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Board(_) => EntityKind::Board,
            Self::List(_) => EntityKind::List,
            Self::Card(_) => EntityKind::Card,
        }
    }

    pub fn id_str(&self) -> &str {
        match self {
            Self::Board(id) => id.as_str(),
            Self::List(id) => id.as_str(),
            Self::Card(id) => id.as_str(),
        }
    }

    /// The container this entity is, for boards and lists
    pub fn as_container(&self) -> Option<ContainerId> {
        match self {
            Self::Board(id) => Some(ContainerId::Board(id.clone())),
            Self::List(id) => Some(ContainerId::List(id.clone())),
            Self::Card(_) => None,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.id_str())
    }
}

impl From<BoardId> for EntityKey {
    fn from(id: BoardId) -> Self {
        Self::Board(id)
    }
}

impl From<ListId> for EntityKey {
    fn from(id: ListId) -> Self {
        Self::List(id)
    }
}

impl From<CardId> for EntityKey {
    fn from(id: CardId) -> Self {
        Self::Card(id)
    }
}

/// An entity whose children carry an `order` rank.
///
/// Boards contain lists and lists contain cards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ContainerId {
    Board(BoardId),
    List(ListId),
}

impl ContainerId {
    pub fn id_str(&self) -> &str {
        match self {
            Self::Board(id) => id.as_str(),
            Self::List(id) => id.as_str(),
        }
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Board(id) => write!(f, "board {}", id),
            Self::List(id) => write!(f, "list {}", id),
        }
    }
}

impl From<BoardId> for ContainerId {
    fn from(id: BoardId) -> Self {
        Self::Board(id)
    }
}

impl From<ListId> for ContainerId {
    fn from(id: ListId) -> Self {
        Self::List(id)
    }
}

/// A whole stored record of any kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    Board(Board),
    List(List),
    Card(Card),
}

impl Entity {
    pub fn key(&self) -> EntityKey {
        match self {
            Self::Board(b) => EntityKey::Board(b.id.clone()),
            Self::List(l) => EntityKey::List(l.id.clone()),
            Self::Card(c) => EntityKey::Card(c.id.clone()),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.key().kind()
    }

    /// The container this entity is ranked in; boards are not ranked
    pub fn container(&self) -> Option<ContainerId> {
        match self {
            Self::Board(_) => None,
            Self::List(l) => Some(ContainerId::Board(l.board_id.clone())),
            Self::Card(c) => Some(ContainerId::List(c.list_id.clone())),
        }
    }

    pub fn order(&self) -> Option<usize> {
        match self {
            Self::Board(_) => None,
            Self::List(l) => Some(l.order),
            Self::Card(c) => Some(c.order),
        }
    }
}

/// A field patch addressed to one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityPatch {
    Board { id: BoardId, patch: BoardPatch },
    List { id: ListId, patch: ListPatch },
    Card { id: CardId, patch: CardPatch },
}

impl EntityPatch {
    pub fn key(&self) -> EntityKey {
        match self {
            Self::Board { id, .. } => EntityKey::Board(id.clone()),
            Self::List { id, .. } => EntityKey::List(id.clone()),
            Self::Card { id, .. } => EntityKey::Card(id.clone()),
        }
    }

    /// The patched fields as a JSON object, the minimal remote diff
    pub fn fields(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Self::Board { patch, .. } => serde_json::to_value(patch),
            Self::List { patch, .. } => serde_json::to_value(patch),
            Self::Card { patch, .. } => serde_json::to_value(patch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_container() {
        let card = Card::new(ListId::from_string("L1"), "x", 0);
        let entity = Entity::Card(card);
        assert_eq!(
            entity.container(),
            Some(ContainerId::List(ListId::from_string("L1")))
        );
        assert_eq!(entity.kind(), EntityKind::Card);
    }

    #[test]
    fn test_key_display() {
        let key = EntityKey::List(ListId::from_string("L2"));
        assert_eq!(key.to_string(), "list L2");
        assert_eq!(EntityKey::new(EntityKind::List, "L2"), key);
        assert_eq!(
            key.as_container(),
            Some(ContainerId::List(ListId::from_string("L2")))
        );
        assert_eq!(EntityKey::Card("c1".into()).as_container(), None);
    }

    #[test]
    fn test_patch_fields_are_minimal() {
        let patch = EntityPatch::Card {
            id: CardId::from_string("c1"),
            patch: CardPatch::title("renamed"),
        };
        assert_eq!(
            patch.fields().unwrap(),
            serde_json::json!({"title": "renamed"})
        );
    }
}
