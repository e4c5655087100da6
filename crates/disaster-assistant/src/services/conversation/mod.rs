pub mod cache;
pub mod long_term;
pub mod types;

pub use cache::SessionStore;
pub use long_term::LongTermMemory;
pub use types::{Session, Turn};
