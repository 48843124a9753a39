//! Core types for the board engine

mod board;
mod card;
mod entity;
mod ids;

// Re-export all types
pub use board::{Board, BoardPatch, List, ListPatch};
pub use card::{Card, CardPatch, ChecklistItem, Comment, Label};
pub use entity::{ContainerId, Entity, EntityKey, EntityKind, EntityPatch};
pub use ids::{BoardId, CardId, ChecklistItemId, CommentId, LabelId, ListId, UserId};
