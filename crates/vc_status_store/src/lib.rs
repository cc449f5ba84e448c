pub mod document;
pub mod memory;
pub mod path;
pub mod store;

pub use document::{
    RawDocument,
    TypedDocument,
    UNPERSISTED_SEQUENCE,
};
pub use memory::InMemoryDocStore;
pub use store::{
    DocStore,
    Equals,
};
