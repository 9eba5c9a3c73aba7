//! Request extractors for caller identity and todo ids.

mod owner;
mod path_id;

pub use owner::{OwnerIdentity, OWNER_HEADER};
pub use path_id::PathTodoId;
