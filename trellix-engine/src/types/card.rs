//! Card types: Card and its owned Label, ChecklistItem and Comment records

use super::ids::{CardId, ChecklistItemId, CommentId, LabelId, ListId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A card on a list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: CardId,
    pub list_id: ListId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Rank within the owning list
    pub order: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub checklist: Vec<ChecklistItem>,
    /// Newest first
    #[serde(default)]
    pub comments: Vec<Comment>,
}

impl Card {
    pub fn new(list_id: ListId, title: impl Into<String>, order: usize) -> Self {
        Self {
            id: CardId::new(),
            list_id,
            title: title.into(),
            description: None,
            order,
            due_date: None,
            labels: Vec::new(),
            checklist: Vec::new(),
            comments: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Fraction of checklist items completed, `None` when there is no checklist
    pub fn checklist_progress(&self) -> Option<(usize, usize)> {
        if self.checklist.is_empty() {
            return None;
        }
        let done = self.checklist.iter().filter(|i| i.completed).count();
        Some((done, self.checklist.len()))
    }
}

/// A colored label on a card
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: LabelId,
    pub text: String,
    /// Color token or hex code, opaque to the engine
    pub color: String,
}

impl Label {
    pub fn new(text: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            id: LabelId::new(),
            text: text.into(),
            color: color.into(),
        }
    }
}

/// One checkbox line on a card
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub id: ChecklistItemId,
    pub text: String,
    pub completed: bool,
}

impl ChecklistItem {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: ChecklistItemId::new(),
            text: text.into(),
            completed: false,
        }
    }
}

/// A comment on a card
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: CommentId,
    pub user_id: UserId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    pub fn new(user_id: UserId, text: impl Into<String>) -> Self {
        Self {
            id: CommentId::new(),
            user_id,
            text: text.into(),
            created_at: Utc::now(),
        }
    }
}

/// Field patch for a card.
///
/// `list_id` is deliberately absent: changing a card's owner only happens
/// through a move, which renumbers both lists in one composite apply.
/// The nested `Option` on `description` and `due_date` distinguishes
/// "leave alone" (`None`) from "clear" (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<Label>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checklist: Option<Vec<ChecklistItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<Vec<Comment>>,
}

impl CardPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = Some(description);
        self
    }

    pub fn with_due_date(mut self, due_date: Option<DateTime<Utc>>) -> Self {
        self.due_date = Some(due_date);
        self
    }

    pub fn order(order: usize) -> Self {
        Self {
            order: Some(order),
            ..Self::default()
        }
    }

    pub(crate) fn merge_into(&self, card: &mut Card) {
        if let Some(title) = &self.title {
            card.title = title.clone();
        }
        if let Some(description) = &self.description {
            card.description = description.clone();
        }
        if let Some(order) = self.order {
            card.order = order;
        }
        if let Some(due_date) = self.due_date {
            card.due_date = due_date;
        }
        if let Some(labels) = &self.labels {
            card.labels = labels.clone();
        }
        if let Some(checklist) = &self.checklist {
            card.checklist = checklist.clone();
        }
        if let Some(comments) = &self.comments {
            card.comments = comments.clone();
        }
    }
}
