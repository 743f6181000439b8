//! Agent function-calling loop running inside the sandboxed container
//! (§4.7). This is the only part of the distilled spec that executes on
//! the *other* side of the container boundary from the supervisor — it is
//! specified because the host contracts with it over the wire types in
//! [`crate::wire`].
//!
//! Split the way the teacher splits worker execution: a thin LLM client
//! (`gemini`), on-disk session persistence (`session`), the tool dispatch
//! table (`tools`), transcript serialization (`transcript`), and the turn
//! loop itself (`turn`) that ties them together.

pub mod gemini;
pub mod session;
pub mod tools;
pub mod transcript;
pub mod turn;

pub use turn::{run_turn, AgentConfig};
