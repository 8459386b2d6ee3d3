//! Loft server: the agent runtime (runner, event hub/writer, permission
//! gate, tool dispatch, sub-agents, context builder) plus the HTTP/SSE
//! surface.

pub mod api;
pub mod bootstrap;
pub mod runtime;
pub mod state;
