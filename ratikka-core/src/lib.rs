//! Core engine types for Ratikka.
//!
//! The crate holds the shared routing [`Graph`] together with the two
//! subsystems that touch it:
//!
//! - the update side, where every mutation runs as a [`WriterTask`] on the
//!   single [`UpdateManager`] worker, and
//! - the search side, where [`ItinerarySearch`] drives an external
//!   [`PathSolver`] to collect distinct, ordered itineraries.
//!
//! Searches only read the graph. Alert sets are swapped as whole snapshots,
//! so a reader sees either the state before a writer task's edit or the
//! state after it.

#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod alert;
pub mod geometry;
mod graph;
mod path;
mod request;
mod search;
mod solver;
mod update;

pub use alert::{Alert, AlertSource, Validity};
pub use graph::{
    Edge, EdgeId, Graph, GraphBuilder, GraphError, GraphWriter, TemporaryLink, Vertex, VertexId,
};
pub use path::{GraphPath, GraphPathError, ShortestPathTree};
pub use request::{RoutingRequest, SearchContext, TraverseMode};
pub use search::{ItinerarySearch, SearchError, SearchTimeouts};
pub use solver::{Deadline, PathSolver, SearchRun};
pub use update::{
    ShutdownPolicy, SubmitError, TaskOutcome, TaskReceipt, UpdateHandle, UpdateManager,
    UpdateManagerError, WriterTask, WriterTaskError,
};

#[cfg(any(test, feature = "test-support"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-support")))]
pub mod test_support;
