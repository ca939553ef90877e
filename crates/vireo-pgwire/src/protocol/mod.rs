//! Wire-protocol message registry
//!
//! Tags alias between directions (`'S'`, `'D'`, `'C'`, `'R'`, `'p'` mean
//! different things frontend vs backend), so the two directions are modeled
//! as disjoint tagged-variant families: [`frontend::FrontendMessage`] and
//! [`backend::BackendMessage`].

pub mod backend;
pub mod constants;
pub mod frontend;
pub mod types;
