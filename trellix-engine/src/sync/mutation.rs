//! Mutations and how each one is committed locally and described remotely

use super::remote::RemoteRequest;
use crate::error::{BoardError, Result};
use crate::reorder::{self, Instruction};
use crate::store::{Change, EntityStore};
use crate::types::{
    Board, BoardId, BoardPatch, Card, CardId, CardPatch, ChecklistItem, ChecklistItemId, Comment,
    CommentId, ContainerId, Entity, EntityKey, EntityKind, EntityPatch, Label, LabelId, List,
    ListId, ListPatch,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Edits to the records a card owns. They have no lifecycle of their own
/// and persist as a patch of the card's whole collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "edit", rename_all = "snake_case")]
pub enum CardEdit {
    AddChecklistItem { item: ChecklistItem },
    ToggleChecklistItem { item: ChecklistItemId },
    DeleteChecklistItem { item: ChecklistItemId },
    /// Comments are kept newest first
    AddComment { comment: Comment },
    DeleteComment { comment: CommentId },
    AddLabel { label: Label },
    RemoveLabel { label: LabelId },
}

impl CardEdit {
    fn op(&self) -> &'static str {
        match self {
            Self::AddChecklistItem { .. } => "add checklist item",
            Self::ToggleChecklistItem { .. } => "toggle checklist item",
            Self::DeleteChecklistItem { .. } => "delete checklist item",
            Self::AddComment { .. } => "add comment",
            Self::DeleteComment { .. } => "delete comment",
            Self::AddLabel { .. } => "add label",
            Self::RemoveLabel { .. } => "remove label",
        }
    }

    /// The card patch realizing this edit against the card's current state
    fn to_patch(&self, card: &Card) -> Result<CardPatch> {
        let mut patch = CardPatch::default();
        match self {
            Self::AddChecklistItem { item } => {
                let mut checklist = card.checklist.clone();
                checklist.push(item.clone());
                patch.checklist = Some(checklist);
            }
            Self::ToggleChecklistItem { item } => {
                let mut checklist = card.checklist.clone();
                let entry = checklist
                    .iter_mut()
                    .find(|i| &i.id == item)
                    .ok_or_else(|| BoardError::not_found("checklist item", item.as_str()))?;
                entry.completed = !entry.completed;
                patch.checklist = Some(checklist);
            }
            Self::DeleteChecklistItem { item } => {
                let checklist = without(&card.checklist, |i| &i.id == item)
                    .ok_or_else(|| BoardError::not_found("checklist item", item.as_str()))?;
                patch.checklist = Some(checklist);
            }
            Self::AddComment { comment } => {
                let mut comments = Vec::with_capacity(card.comments.len() + 1);
                comments.push(comment.clone());
                comments.extend(card.comments.iter().cloned());
                patch.comments = Some(comments);
            }
            Self::DeleteComment { comment } => {
                let comments = without(&card.comments, |c| &c.id == comment)
                    .ok_or_else(|| BoardError::not_found("comment", comment.as_str()))?;
                patch.comments = Some(comments);
            }
            Self::AddLabel { label } => {
                let mut labels = card.labels.clone();
                labels.push(label.clone());
                patch.labels = Some(labels);
            }
            Self::RemoveLabel { label } => {
                let labels = without(&card.labels, |l| &l.id == label)
                    .ok_or_else(|| BoardError::not_found("label", label.as_str()))?;
                patch.labels = Some(labels);
            }
        }
        Ok(patch)
    }
}

/// Copy of `items` without the first match, or `None` if nothing matched
fn without<T: Clone>(items: &[T], matches: impl Fn(&T) -> bool) -> Option<Vec<T>> {
    let index = items.iter().position(matches)?;
    let mut out = items.to_vec();
    out.remove(index);
    Some(out)
}

/// A user-level write routed through the sync coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    CreateBoard { board: Board },
    UpdateBoard { id: BoardId, patch: BoardPatch },
    DeleteBoard { id: BoardId },
    /// The list's `order` is replaced by the append position
    CreateList { list: List },
    RenameList { id: ListId, title: String },
    DeleteList { id: ListId },
    /// The card's `order` is replaced by the append position
    CreateCard { card: Card },
    UpdateCard { id: CardId, patch: CardPatch },
    EditCard { id: CardId, edit: CardEdit },
    DeleteCard { id: CardId },
    /// A list reorder or card move resolved from a drag gesture
    Reorder { instruction: Instruction },
}

impl Mutation {
    /// Canonical op string, e.g. "move card"
    pub fn op(&self) -> &'static str {
        match self {
            Self::CreateBoard { .. } => "create board",
            Self::UpdateBoard { .. } => "update board",
            Self::DeleteBoard { .. } => "delete board",
            Self::CreateList { .. } => "create list",
            Self::RenameList { .. } => "rename list",
            Self::DeleteList { .. } => "delete list",
            Self::CreateCard { .. } => "create card",
            Self::UpdateCard { .. } => "update card",
            Self::EditCard { edit, .. } => edit.op(),
            Self::DeleteCard { .. } => "delete card",
            Self::Reorder {
                instruction: Instruction::ReorderList { .. },
            } => "reorder list",
            Self::Reorder {
                instruction: Instruction::MoveCard { .. },
            } => "move card",
        }
    }

    /// The entity the mutation is about
    pub fn subject(&self) -> EntityKey {
        match self {
            Self::CreateBoard { board } => EntityKey::Board(board.id.clone()),
            Self::UpdateBoard { id, .. } | Self::DeleteBoard { id } => EntityKey::Board(id.clone()),
            Self::CreateList { list } => EntityKey::List(list.id.clone()),
            Self::RenameList { id, .. } | Self::DeleteList { id } => EntityKey::List(id.clone()),
            Self::CreateCard { card } => EntityKey::Card(card.id.clone()),
            Self::UpdateCard { id, .. } | Self::EditCard { id, .. } | Self::DeleteCard { id } => {
                EntityKey::Card(id.clone())
            }
            Self::Reorder { instruction } => instruction.subject(),
        }
    }

    /// Whether a failed dispatch must restore the pre-mutation state
    /// regardless of configuration. Deletes and moves cannot be safely
    /// retried, so leaving them diverged would corrupt every later reorder.
    pub fn requires_rollback(&self) -> bool {
        matches!(
            self,
            Self::DeleteBoard { .. }
                | Self::DeleteList { .. }
                | Self::DeleteCard { .. }
                | Self::Reorder { .. }
        )
    }
}

/// A mutation applied to the store and waiting to be persisted
#[derive(Debug)]
pub(crate) struct Committed {
    pub op: &'static str,
    pub subject: EntityKey,
    pub board: BoardId,
    pub change: Change,
    pub requests: Vec<RemoteRequest>,
    pub requires_rollback: bool,
}

/// Apply `mutation` to the store and describe it for the remote.
///
/// Returns `Ok(None)` for a no-op, which must not be dispatched.
pub(crate) fn commit(store: &mut EntityStore, mutation: Mutation) -> Result<Option<Committed>> {
    let op = mutation.op();
    let subject = mutation.subject();
    let requires_rollback = mutation.requires_rollback();

    let (board, change, requests) = match mutation {
        Mutation::CreateBoard { board } => {
            let id = board.id.clone();
            let payload = serde_json::to_value(&board)?;
            let change = store.apply_create(Entity::Board(board), None)?;
            (id, change, vec![create(EntityKind::Board, payload)])
        }
        Mutation::UpdateBoard { id, patch } => {
            let patch = EntityPatch::Board { id: id.clone(), patch };
            let change = store.apply_patch(&patch)?;
            (id, change, vec![patch_request(&patch)?])
        }
        Mutation::DeleteBoard { id } => {
            let change = store.apply_delete(&EntityKey::Board(id.clone()))?;
            let request = delete(EntityKind::Board, id.as_str());
            (id, change, vec![request])
        }
        Mutation::CreateList { list } => {
            let id = list.id.clone();
            let board = list.board_id.clone();
            let change = store.apply_create(Entity::List(list), None)?;
            let payload = serde_json::to_value(store.list(&id))?;
            (board, change, vec![create(EntityKind::List, payload)])
        }
        Mutation::RenameList { id, title } => {
            let board = board_of_list(store, &id)?;
            let patch = EntityPatch::List {
                id,
                patch: ListPatch::title(title),
            };
            let change = store.apply_patch(&patch)?;
            (board, change, vec![patch_request(&patch)?])
        }
        Mutation::DeleteList { id } => {
            let board = board_of_list(store, &id)?;
            let change = store.apply_delete(&EntityKey::List(id.clone()))?;
            (board, change, vec![delete(EntityKind::List, id.as_str())])
        }
        Mutation::CreateCard { card } => {
            let id = card.id.clone();
            let board = board_of_list(store, &card.list_id)?;
            let change = store.apply_create(Entity::Card(card), None)?;
            let payload = serde_json::to_value(store.card(&id))?;
            (board, change, vec![create(EntityKind::Card, payload)])
        }
        Mutation::UpdateCard { id, patch } => {
            let board = board_of_card(store, &id)?;
            let patch = EntityPatch::Card { id, patch };
            let change = store.apply_patch(&patch)?;
            (board, change, vec![patch_request(&patch)?])
        }
        Mutation::EditCard { id, edit } => {
            let board = board_of_card(store, &id)?;
            let card = store
                .card(&id)
                .ok_or_else(|| BoardError::not_found("card", id.as_str()))?;
            let patch = EntityPatch::Card {
                patch: edit.to_patch(card)?,
                id,
            };
            let change = store.apply_patch(&patch)?;
            (board, change, vec![patch_request(&patch)?])
        }
        Mutation::DeleteCard { id } => {
            let board = board_of_card(store, &id)?;
            let change = store.apply_delete(&EntityKey::Card(id.clone()))?;
            (board, change, vec![delete(EntityKind::Card, id.as_str())])
        }
        Mutation::Reorder { instruction } => {
            let Some(plan) = reorder::plan(store, &instruction)? else {
                return Ok(None);
            };
            let board = match &plan.destination {
                ContainerId::Board(board) => board.clone(),
                ContainerId::List(list) => board_of_list(store, list)?,
            };
            let change = store.apply_plan(&plan)?;

            let mut requests = Vec::with_capacity(3);
            if let EntityKey::Card(card) = &plan.moved {
                requests.push(RemoteRequest::Patch {
                    kind: EntityKind::Card,
                    id: card.to_string(),
                    fields: json!({
                        "listId": plan.destination.id_str(),
                        "order": plan.order,
                    }),
                });
            }
            requests.push(reorder_request(&plan.destination, &plan.destination_order));
            if let Some(source_order) = &plan.source_order {
                requests.push(reorder_request(&plan.source, source_order));
            }
            (board, change, requests)
        }
    };

    Ok(Some(Committed {
        op,
        subject,
        board,
        change,
        requests,
        requires_rollback,
    }))
}

/// Requests that undo `sent`, the part of a dispatch the remote accepted
/// before a later request failed.
///
/// Call after `change` was restored locally: reorders resend the restored
/// sequences and patches resend the before-image of every field they set.
pub(crate) fn compensation(
    store: &EntityStore,
    change: &Change,
    sent: &[RemoteRequest],
) -> Result<Vec<RemoteRequest>> {
    let mut undo = Vec::with_capacity(sent.len());
    for request in sent.iter().rev() {
        match request {
            RemoteRequest::Create { kind, payload } => {
                if let Some(id) = payload.get("id").and_then(Value::as_str) {
                    undo.push(delete(*kind, id));
                }
            }
            RemoteRequest::Patch { kind, id, fields } => {
                let Some(prior) = change.before(&EntityKey::new(*kind, id.as_str())) else {
                    continue;
                };
                let prior = record_payload(prior)?;
                let restored: Map<String, Value> = fields
                    .as_object()
                    .into_iter()
                    .flat_map(|fields| fields.keys())
                    .map(|field| {
                        let value = prior.get(field).cloned().unwrap_or(Value::Null);
                        (field.clone(), value)
                    })
                    .collect();
                undo.push(RemoteRequest::Patch {
                    kind: *kind,
                    id: id.clone(),
                    fields: Value::Object(restored),
                });
            }
            RemoteRequest::Delete { kind, id } => {
                if let Some(prior) = change.before(&EntityKey::new(*kind, id.as_str())) {
                    undo.push(create(*kind, record_payload(prior)?));
                }
            }
            RemoteRequest::Reorder { container, .. } => {
                undo.push(reorder_request(container, &store.list_container(container)));
            }
        }
    }
    Ok(undo)
}

/// The record itself, shaped like a create payload
fn record_payload(entity: &Entity) -> serde_json::Result<Value> {
    match entity {
        Entity::Board(board) => serde_json::to_value(board),
        Entity::List(list) => serde_json::to_value(list),
        Entity::Card(card) => serde_json::to_value(card),
    }
}

fn board_of_list(store: &EntityStore, list: &ListId) -> Result<BoardId> {
    store
        .list(list)
        .map(|l| l.board_id.clone())
        .ok_or_else(|| BoardError::not_found("list", list.as_str()))
}

fn board_of_card(store: &EntityStore, card: &CardId) -> Result<BoardId> {
    let list = store
        .card(card)
        .map(|c| c.list_id.clone())
        .ok_or_else(|| BoardError::not_found("card", card.as_str()))?;
    board_of_list(store, &list)
}

fn create(kind: EntityKind, payload: serde_json::Value) -> RemoteRequest {
    RemoteRequest::Create { kind, payload }
}

fn delete(kind: EntityKind, id: &str) -> RemoteRequest {
    RemoteRequest::Delete {
        kind,
        id: id.to_string(),
    }
}

fn patch_request(patch: &EntityPatch) -> Result<RemoteRequest> {
    let key = patch.key();
    Ok(RemoteRequest::Patch {
        kind: key.kind(),
        id: key.id_str().to_string(),
        fields: patch.fields()?,
    })
}

fn reorder_request(container: &ContainerId, order: &[EntityKey]) -> RemoteRequest {
    RemoteRequest::Reorder {
        container: container.clone(),
        ordered_ids: order.iter().map(|k| k.id_str().to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserId;

    fn setup() -> (EntityStore, ListId, CardId) {
        let mut store = EntityStore::new();
        let board = Board::new(UserId::from_string("u1"), "B", "bg");
        let list = List::new(board.id.clone(), "L", 0);
        let card = Card::new(list.id.clone(), "C", 0);
        let (list_id, card_id) = (list.id.clone(), card.id.clone());
        store.apply_create(Entity::Board(board), None).unwrap();
        store.apply_create(Entity::List(list), None).unwrap();
        store.apply_create(Entity::Card(card), None).unwrap();
        (store, list_id, card_id)
    }

    #[test]
    fn test_op_strings() {
        let m = Mutation::Reorder {
            instruction: Instruction::move_card("c1", "L1", 0),
        };
        assert_eq!(m.op(), "move card");
        assert!(m.requires_rollback());
        let m = Mutation::RenameList {
            id: "L1".into(),
            title: "x".into(),
        };
        assert_eq!(m.op(), "rename list");
        assert!(!m.requires_rollback());
    }

    #[test]
    fn test_toggle_checklist_item_round_trip() {
        let (mut store, _, card) = setup();
        let item = ChecklistItem::new("write tests");
        let item_id = item.id.clone();

        commit(
            &mut store,
            Mutation::EditCard {
                id: card.clone(),
                edit: CardEdit::AddChecklistItem { item },
            },
        )
        .unwrap();
        commit(
            &mut store,
            Mutation::EditCard {
                id: card.clone(),
                edit: CardEdit::ToggleChecklistItem { item: item_id },
            },
        )
        .unwrap();

        assert!(store.card(&card).unwrap().checklist[0].completed);
    }

    #[test]
    fn test_comments_are_newest_first() {
        let (mut store, _, card) = setup();
        for text in ["first", "second"] {
            commit(
                &mut store,
                Mutation::EditCard {
                    id: card.clone(),
                    edit: CardEdit::AddComment {
                        comment: Comment::new(UserId::from_string("u1"), text),
                    },
                },
            )
            .unwrap();
        }
        let texts: Vec<&str> = store
            .card(&card)
            .unwrap()
            .comments
            .iter()
            .map(|c| c.text.as_str())
            .collect();
        assert_eq!(texts, vec!["second", "first"]);
    }

    #[test]
    fn test_edit_of_missing_sub_entity() {
        let (mut store, _, card) = setup();
        let result = commit(
            &mut store,
            Mutation::EditCard {
                id: card,
                edit: CardEdit::RemoveLabel {
                    label: LabelId::from_string("nope"),
                },
            },
        );
        assert!(matches!(result, Err(BoardError::NotFound { .. })));
    }

    #[test]
    fn test_create_card_payload_carries_assigned_order() {
        let (mut store, list, _) = setup();
        let committed = commit(
            &mut store,
            Mutation::CreateCard {
                card: Card::new(list, "second", 42),
            },
        )
        .unwrap()
        .unwrap();
        match &committed.requests[0] {
            RemoteRequest::Create { kind, payload } => {
                assert_eq!(*kind, EntityKind::Card);
                assert_eq!(payload["order"], 1);
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_compensation_undoes_accepted_prefix_of_move() {
        let (mut store, list, card) = setup();
        let board = store.list(&list).unwrap().board_id.clone();
        let other = List::new(board, "Other", 0);
        let other_id = other.id.clone();
        store.apply_create(Entity::List(other), None).unwrap();

        let committed = commit(
            &mut store,
            Mutation::Reorder {
                instruction: Instruction::move_card(card.clone(), other_id.clone(), 0),
            },
        )
        .unwrap()
        .unwrap();
        store.restore(&committed.change);

        // Patch and destination reorder went through, the source reorder failed
        let undo = compensation(&store, &committed.change, &committed.requests[..2]).unwrap();
        assert_eq!(undo.len(), 2);
        assert_eq!(
            undo[0],
            RemoteRequest::Reorder {
                container: ContainerId::List(other_id),
                ordered_ids: vec![],
            }
        );
        assert_eq!(
            undo[1],
            RemoteRequest::Patch {
                kind: EntityKind::Card,
                id: card.to_string(),
                fields: json!({ "listId": list.as_str(), "order": 0 }),
            }
        );
    }

    #[test]
    fn test_compensation_deletes_accepted_create() {
        let (mut store, list, _) = setup();
        let card = Card::new(list, "new", 0);
        let id = card.id.clone();
        let committed = commit(&mut store, Mutation::CreateCard { card })
            .unwrap()
            .unwrap();
        store.restore(&committed.change);

        let undo = compensation(&store, &committed.change, &committed.requests).unwrap();
        assert_eq!(undo, vec![delete(EntityKind::Card, id.as_str())]);
    }

    #[test]
    fn test_noop_move_commits_nothing() {
        let (mut store, list, card) = setup();
        let result = commit(
            &mut store,
            Mutation::Reorder {
                instruction: Instruction::move_card(card, list, 0),
            },
        )
        .unwrap();
        assert!(result.is_none());
    }
}
