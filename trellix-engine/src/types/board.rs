//! Board-level types: Board and List

use super::ids::{BoardId, ListId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A board is the top-level container. It holds lists but no rank of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    pub id: BoardId,
    pub title: String,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
    /// Display theme token. Opaque to the engine.
    pub background: String,
}

impl Board {
    /// Create a new board owned by `owner`, stamped with the current time
    pub fn new(owner: UserId, title: impl Into<String>, background: impl Into<String>) -> Self {
        Self {
            id: BoardId::new(),
            title: title.into(),
            owner_id: owner,
            created_at: Utc::now(),
            background: background.into(),
        }
    }
}

/// A list is an ordered column of cards on a board
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct List {
    pub id: ListId,
    pub board_id: BoardId,
    pub title: String,
    /// Rank within the board, ascending left-to-right
    pub order: usize,
}

impl List {
    pub fn new(board_id: BoardId, title: impl Into<String>, order: usize) -> Self {
        Self {
            id: ListId::new(),
            board_id,
            title: title.into(),
            order,
        }
    }
}

/// Field patch for a board. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
}

impl BoardPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn with_background(mut self, background: impl Into<String>) -> Self {
        self.background = Some(background.into());
        self
    }

    pub(crate) fn merge_into(&self, board: &mut Board) {
        if let Some(title) = &self.title {
            board.title = title.clone();
        }
        if let Some(background) = &self.background {
            board.background = background.clone();
        }
    }
}

/// Field patch for a list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<usize>,
}

impl ListPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            order: None,
        }
    }

    pub fn order(order: usize) -> Self {
        Self {
            title: None,
            order: Some(order),
        }
    }

    pub(crate) fn merge_into(&self, list: &mut List) {
        if let Some(title) = &self.title {
            list.title = title.clone();
        }
        if let Some(order) = self.order {
            list.order = order;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_board_creation() {
        let owner = UserId::from_string("u1");
        let board = Board::new(owner.clone(), "Roadmap", "bg-sky");
        assert_eq!(board.title, "Roadmap");
        assert_eq!(board.owner_id, owner);
        assert_eq!(board.background, "bg-sky");
    }

    #[test]
    fn test_list_serializes_camel_case() {
        let list = List {
            id: ListId::from_string("L1"),
            board_id: BoardId::from_string("B1"),
            title: "Todo".into(),
            order: 0,
        };
        let json = serde_json::to_value(&list).unwrap();
        assert_eq!(json["boardId"], "B1");
        assert_eq!(json["order"], 0);
    }

    #[test]
    fn test_patch_only_touches_present_fields() {
        let mut list = List::new(BoardId::from_string("B1"), "Todo", 3);
        ListPatch::title("Doing").merge_into(&mut list);
        assert_eq!(list.title, "Doing");
        assert_eq!(list.order, 3);

        let json = serde_json::to_value(ListPatch::order(1)).unwrap();
        assert_eq!(json, serde_json::json!({"order": 1}));
    }
}
