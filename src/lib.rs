//! Facade crate for the Ratikka trip-planning engine.
//!
//! This crate re-exports the core graph, update and search types and exposes
//! the real-time alert updaters behind a feature flag.

#![forbid(unsafe_code)]

pub use ratikka_core::{
    Alert, AlertSource, Deadline, Edge, EdgeId, Graph, GraphBuilder, GraphError, GraphPath,
    GraphPathError, GraphWriter, ItinerarySearch, PathSolver, RoutingRequest, SearchContext,
    SearchError, SearchRun, SearchTimeouts, ShortestPathTree, ShutdownPolicy, SubmitError,
    TaskOutcome, TaskReceipt, TemporaryLink, TraverseMode, UpdateHandle, UpdateManager,
    UpdateManagerError, Validity, Vertex, VertexId, WriterTask, WriterTaskError,
};

#[cfg(feature = "updater-wfs")]
pub use ratikka_updater::{
    AlertConvergence, Feature, FeedError, FeedSource, PollOutcome, PollingHandle, PollingUpdater,
    PollingUpdaterConfig, UpdaterError, UpdaterState, WfsFeed,
};
