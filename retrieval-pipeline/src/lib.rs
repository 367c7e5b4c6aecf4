//! C6/C11 — the retrieval tool layer and the agent runtime that drives it.
//!
//! `agent::tools` exposes the fixed tool contract the LLM calls during a turn; `agent::runtime`
//! owns session/message persistence and the tool-calling loop, non-streaming and streaming.

pub mod agent;
