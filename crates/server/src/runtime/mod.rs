//! The agent runtime — runner loop, event plumbing, permission gate, tool
//! dispatch, and the context builder.
//!
//! Entry point: [`spawn_turn`] launches one turn's runner task; everything
//! it emits flows through the [`writer::EventWriter`] (persist, then fan
//! out) so SSE order, replay order, and id order are identical.

pub mod cancel;
pub mod context;
pub mod dispatch;
pub mod gate;
pub mod hub;
pub mod registry;
pub mod runner;
pub mod subagent;
pub mod writer;

pub use runner::{spawn_turn, TurnInput};
