//! Turn execution
//!
//! One assistant turn: upstream text in, stream events out, tools dispatched
//! in between.

pub mod executor;

pub use executor::{TurnConfig, TurnError, TurnExecutor, TurnResult};
