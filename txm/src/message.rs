pub use db::MessageDb;
pub use types::{Message, MessageId, MessageState};

mod db;
mod types;
