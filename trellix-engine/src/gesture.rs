//! Gesture interpreter - folds drag lifecycle events into one instruction
//!
//! The UI reports `start`, any number of `over`, then `end` or `cancel`.
//! Only `end` can produce an [`Instruction`]; the interpreter is back in
//! [`GestureState::Idle`] by the time it returns. Hovering only updates the
//! preview; the drop target comes from the `end` event alone and is resolved
//! against the store at that moment.

use crate::reorder::Instruction;
use crate::store::EntityStore;
use crate::types::{CardId, ContainerId, EntityKey, ListId};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DragPhase {
    Start,
    Over,
    End,
    Cancel,
}

/// What can be dragged or hovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DragKind {
    List,
    Card,
}

/// One drag lifecycle event from the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DragEvent {
    pub phase: DragPhase,
    pub dragged_id: String,
    pub dragged_kind: DragKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub over_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub over_kind: Option<DragKind>,
}

impl DragEvent {
    pub fn start(kind: DragKind, id: impl Into<String>) -> Self {
        Self {
            phase: DragPhase::Start,
            dragged_id: id.into(),
            dragged_kind: kind,
            over_id: None,
            over_kind: None,
        }
    }

    pub fn over(kind: DragKind, id: impl Into<String>, over_kind: DragKind, over_id: impl Into<String>) -> Self {
        Self {
            phase: DragPhase::Over,
            over_id: Some(over_id.into()),
            over_kind: Some(over_kind),
            ..Self::start(kind, id)
        }
    }

    pub fn end(kind: DragKind, id: impl Into<String>, over_kind: DragKind, over_id: impl Into<String>) -> Self {
        Self {
            phase: DragPhase::End,
            ..Self::over(kind, id, over_kind, over_id)
        }
    }

    /// Drop outside any target
    pub fn end_nowhere(kind: DragKind, id: impl Into<String>) -> Self {
        Self {
            phase: DragPhase::End,
            ..Self::start(kind, id)
        }
    }

    pub fn cancel(kind: DragKind, id: impl Into<String>) -> Self {
        Self {
            phase: DragPhase::Cancel,
            ..Self::start(kind, id)
        }
    }

    fn dragged(&self) -> EntityKey {
        key_for(self.dragged_kind, &self.dragged_id)
    }

    fn target(&self) -> Option<EntityKey> {
        match (&self.over_id, self.over_kind) {
            (Some(id), Some(kind)) => Some(key_for(kind, id)),
            _ => None,
        }
    }
}

fn key_for(kind: DragKind, id: &str) -> EntityKey {
    match kind {
        DragKind::List => EntityKey::List(ListId::from_string(id)),
        DragKind::Card => EntityKey::Card(CardId::from_string(id)),
    }
}

/// An in-progress drag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragSession {
    pub dragged: EntityKey,
    /// Container and index the entity was picked up from
    pub origin: ContainerId,
    pub origin_index: usize,
    /// Last hovered entity, if any
    pub preview: Option<EntityKey>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum GestureState {
    #[default]
    Idle,
    Dragging(DragSession),
}

/// Drag state machine
#[derive(Debug, Default)]
pub struct GestureInterpreter {
    state: GestureState,
}

impl GestureInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &GestureState {
        &self.state
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.state, GestureState::Dragging(_))
    }

    /// Current would-drop-here target
    pub fn preview(&self) -> Option<&EntityKey> {
        match &self.state {
            GestureState::Dragging(session) => session.preview.as_ref(),
            GestureState::Idle => None,
        }
    }

    /// Feed one event. Returns the instruction to execute when a drop
    /// resolves to an actual move.
    pub fn handle(&mut self, event: &DragEvent, store: &EntityStore) -> Option<Instruction> {
        let dragged = event.dragged();
        match event.phase {
            DragPhase::Start => {
                self.state = match store.position_of(&dragged) {
                    Some((origin, origin_index)) => {
                        trace!(entity = %dragged, origin = %origin, origin_index, "drag started");
                        GestureState::Dragging(DragSession {
                            dragged,
                            origin,
                            origin_index,
                            preview: None,
                        })
                    }
                    None => {
                        debug!(entity = %dragged, "drag started on unknown entity");
                        GestureState::Idle
                    }
                };
                None
            }
            DragPhase::Over => {
                if let GestureState::Dragging(session) = &mut self.state {
                    if session.dragged == dragged {
                        session.preview = event.target();
                    }
                }
                None
            }
            DragPhase::Cancel => {
                if self.is_dragging() {
                    debug!(entity = %dragged, "drag cancelled");
                }
                self.state = GestureState::Idle;
                None
            }
            DragPhase::End => {
                let GestureState::Dragging(session) = std::mem::take(&mut self.state) else {
                    return None;
                };
                if session.dragged != dragged {
                    debug!(entity = %dragged, session = %session.dragged, "drop for a different drag");
                    return None;
                }
                // The preview is display-only; a drop outside every target is a no-op
                let target = event.target()?;
                let instruction = resolve(&session, &target, store);
                match &instruction {
                    Some(instruction) => debug!(?instruction, "drop resolved"),
                    None => debug!(entity = %dragged, target = %target, "drop changes nothing"),
                }
                instruction
            }
        }
    }
}

/// Turn a drop on `target` into an instruction, or `None` when the drop
/// lands where the entity started or on nothing it can go to.
fn resolve(session: &DragSession, target: &EntityKey, store: &EntityStore) -> Option<Instruction> {
    if target == &session.dragged {
        return None;
    }
    match (&session.dragged, target) {
        (EntityKey::Card(card), EntityKey::Card(_)) => {
            let (container, index) = store.position_of(target)?;
            let ContainerId::List(list) = container else {
                return None;
            };
            Some(Instruction::move_card(card.clone(), list, index))
        }
        (EntityKey::Card(card), EntityKey::List(list)) => {
            store.list(list)?;
            if session.origin == ContainerId::List(list.clone()) {
                return None;
            }
            Some(Instruction::append_card(card.clone(), list.clone()))
        }
        (EntityKey::List(list), EntityKey::List(_)) => {
            let (container, index) = store.position_of(target)?;
            (container == session.origin).then(|| Instruction::reorder_list(list.clone(), index))
        }
        (EntityKey::List(list), EntityKey::Card(card)) => {
            let owner = store.card(card)?.list_id.clone();
            if &owner == list {
                return None;
            }
            let (container, index) = store.position_of(&EntityKey::List(owner))?;
            (container == session.origin).then(|| Instruction::reorder_list(list.clone(), index))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Board, BoardId, Card, List, UserId};

    /// B1: L1[a, b], L2[c], L3[]
    fn store() -> EntityStore {
        let mut board = Board::new(UserId::from_string("u1"), "B1", "bg");
        board.id = BoardId::from_string("B1");
        let lists = ["L1", "L2", "L3"]
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let mut list = List::new(board.id.clone(), *id, i);
                list.id = ListId::from_string(*id);
                list
            })
            .collect();
        let cards = [("a", "L1", 0), ("b", "L1", 1), ("c", "L2", 0)]
            .iter()
            .map(|(id, list, order)| {
                let mut card = Card::new(ListId::from_string(*list), *id, *order);
                card.id = CardId::from_string(*id);
                card
            })
            .collect();
        EntityStore::load(vec![board], lists, cards).unwrap()
    }

    #[test]
    fn test_card_dropped_on_card_in_other_list() {
        let store = store();
        let mut gestures = GestureInterpreter::new();
        assert!(gestures
            .handle(&DragEvent::start(DragKind::Card, "a"), &store)
            .is_none());
        assert!(gestures.is_dragging());

        let instruction = gestures.handle(&DragEvent::end(DragKind::Card, "a", DragKind::Card, "c"), &store);
        assert_eq!(instruction, Some(Instruction::move_card("a", "L2", 0)));
        assert_eq!(gestures.state(), &GestureState::Idle);
    }

    #[test]
    fn test_drop_outside_ignores_last_hover() {
        let store = store();
        let mut gestures = GestureInterpreter::new();
        gestures.handle(&DragEvent::start(DragKind::Card, "b"), &store);
        gestures.handle(&DragEvent::over(DragKind::Card, "b", DragKind::List, "L2"), &store);
        gestures.handle(&DragEvent::over(DragKind::Card, "b", DragKind::List, "L3"), &store);
        assert_eq!(gestures.preview(), Some(&EntityKey::List(ListId::from_string("L3"))));

        let instruction = gestures.handle(&DragEvent::end_nowhere(DragKind::Card, "b"), &store);
        assert!(instruction.is_none());
        assert_eq!(gestures.state(), &GestureState::Idle);
        assert!(gestures.preview().is_none());
    }

    #[test]
    fn test_drop_without_target_emits_nothing() {
        let store = store();
        let mut gestures = GestureInterpreter::new();
        gestures.handle(&DragEvent::start(DragKind::Card, "a"), &store);
        assert!(gestures
            .handle(&DragEvent::end_nowhere(DragKind::Card, "a"), &store)
            .is_none());
        assert!(!gestures.is_dragging());
    }

    #[test]
    fn test_drop_on_origin_emits_nothing() {
        let store = store();
        let mut gestures = GestureInterpreter::new();
        gestures.handle(&DragEvent::start(DragKind::Card, "a"), &store);
        assert!(gestures
            .handle(&DragEvent::end(DragKind::Card, "a", DragKind::Card, "a"), &store)
            .is_none());

        gestures.handle(&DragEvent::start(DragKind::Card, "a"), &store);
        assert!(gestures
            .handle(&DragEvent::end(DragKind::Card, "a", DragKind::List, "L1"), &store)
            .is_none());
    }

    #[test]
    fn test_cancel_discards_drag() {
        let store = store();
        let mut gestures = GestureInterpreter::new();
        gestures.handle(&DragEvent::start(DragKind::List, "L1"), &store);
        gestures.handle(&DragEvent::over(DragKind::List, "L1", DragKind::List, "L3"), &store);
        assert!(gestures
            .handle(&DragEvent::cancel(DragKind::List, "L1"), &store)
            .is_none());
        assert_eq!(gestures.state(), &GestureState::Idle);
        // A stray end after cancel does nothing
        assert!(gestures
            .handle(&DragEvent::end(DragKind::List, "L1", DragKind::List, "L3"), &store)
            .is_none());
    }

    #[test]
    fn test_list_dropped_on_list_or_card() {
        let store = store();
        let mut gestures = GestureInterpreter::new();
        gestures.handle(&DragEvent::start(DragKind::List, "L1"), &store);
        assert_eq!(
            gestures.handle(&DragEvent::end(DragKind::List, "L1", DragKind::List, "L3"), &store),
            Some(Instruction::reorder_list("L1", 2))
        );

        gestures.handle(&DragEvent::start(DragKind::List, "L3"), &store);
        assert_eq!(
            gestures.handle(&DragEvent::end(DragKind::List, "L3", DragKind::Card, "c"), &store),
            Some(Instruction::reorder_list("L3", 1))
        );
    }

    #[test]
    fn test_unknown_dragged_entity_stays_idle() {
        let store = store();
        let mut gestures = GestureInterpreter::new();
        gestures.handle(&DragEvent::start(DragKind::Card, "ghost"), &store);
        assert!(!gestures.is_dragging());
    }

    #[test]
    fn test_event_wire_format() {
        let json = r#"{"phase":"over","draggedId":"a","draggedKind":"card","overId":"L2","overKind":"list"}"#;
        let event: DragEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event, DragEvent::over(DragKind::Card, "a", DragKind::List, "L2"));
    }
}
