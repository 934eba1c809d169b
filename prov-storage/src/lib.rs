//! Provenance Storage - search index and cold store abstractions
//!
//! The engine only talks to these traits. In-memory implementations back the
//! tests; `LocalColdStore` and `FileCursorStore` persist to local disk.

pub mod cold;
pub mod cursor;
pub mod eval;
pub mod index;
pub mod memory;

pub use cold::{ColdStore, InMemoryColdStore, LocalColdStore};
pub use cursor::{ArchivalCursor, CursorStore, FileCursorStore, InMemoryCursorStore};
pub use index::{AggregationResponse, IndexMapping, Scroll, ScrollPage, SearchIndex};
pub use memory::InMemorySearchIndex;
