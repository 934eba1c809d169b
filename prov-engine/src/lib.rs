//! Provenance Engine - footprints, trees and archival
//!
//! Everything here runs synchronously on the calling thread against the
//! storage traits of prov-storage:
//!
//! - [`footprint`]: classify the artifacts an application touched
//! - [`tree`]: rebuild directory trees from flat records
//! - [`archival`]: move old operations to cold storage or drop them
//! - [`ops`] / [`state`]: query controllers over operation and state documents

mod apps;
pub mod archival;
pub mod footprint;
pub mod ops;
pub mod projects;
pub mod state;
pub mod tree;

pub use archival::{archive_id, ArchivalController, ArchiveStore, ColdFileStore, NoStore, Round};
pub use footprint::{
    artifact_footprint, classify, file_footprint, footprint_operations, Footprint,
};
pub use ops::{FootprintResult, OpsAncestors, OpsController, OpsCount, OpsPage};
pub use projects::{InMemoryProjects, ProjectResolver};
pub use state::{StateAncestors, StateController, StatePage};
pub use tree::{full_tree, min_tree, AncestorSource, TreeNode, TreeRecord, TreeResult};
