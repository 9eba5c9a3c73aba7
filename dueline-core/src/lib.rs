//! Dueline Core - Domain Types
//!
//! Entities, typed identifiers, validation rules and the error taxonomy
//! shared by every other dueline crate. No I/O lives here.

pub mod config;
pub mod entities;
pub mod error;
pub mod identity;
pub mod validation;

pub use config::parse_duration;
pub use entities::{NewTodo, Todo, TodoPatch};
pub use error::{
    CacheError, ConfigError, DuelineError, DuelineResult, StorageError, ValidationError,
};
pub use identity::{OwnerId, Timestamp, TodoId};
pub use validation::{
    normalize_new_todo, normalize_patch, DESCRIPTION_MAX_CHARS, TITLE_MAX_CHARS,
};
