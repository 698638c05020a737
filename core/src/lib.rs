// Nexus Core Library

pub mod engine;
pub mod event;
pub mod resource;
pub mod session;
pub mod stream;
pub mod tools;
pub mod turn;

pub use engine::{Engine, EngineBuilder, TurnHandle};
pub use stream::{IncrementalExtractor, ParsedToolCall, Segment, ToolCallParser};
pub use tools::router::ToolRouter;
pub use turn::{TurnConfig, TurnError, TurnExecutor, TurnResult};
