//! Storage capability interface trait definition

mod search_cursor;
mod storage_backend;
mod storage_type;

pub use search_cursor::{SearchCursor, VecSearchCursor};
pub use storage_backend::{closed_handle_error, StorageBackend};
pub use storage_type::StorageType;
