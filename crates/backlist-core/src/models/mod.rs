pub mod author;
pub mod catalog_entry;
pub mod metadata;
pub mod read_book;
pub mod recommendation;

pub use author::*;
pub use catalog_entry::*;
pub use metadata::*;
pub use read_book::*;
pub use recommendation::*;
