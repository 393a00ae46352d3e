//! Test doubles for the search orchestrator and small fixture graphs.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use geo::Coord;

use crate::{
    Deadline, EdgeId, Graph, GraphPath, PathSolver, RoutingRequest, SearchRun, ShortestPathTree,
};

/// Four-vertex diamond graph with edges `e0..e3`:
/// `A(0,0) -> B(1,0) -> C(2,0)` and `A -> D(1,1) -> C`.
pub fn sample_graph() -> Arc<Graph> {
    let mut builder = Graph::builder();
    let a = builder.add_vertex("A", Coord { x: 0.0, y: 0.0 });
    let b = builder.add_vertex("B", Coord { x: 1.0, y: 0.0 });
    let c = builder.add_vertex("C", Coord { x: 2.0, y: 0.0 });
    let d = builder.add_vertex("D", Coord { x: 1.0, y: 1.0 });
    for (from, to, label) in [(a, b, "AB"), (b, c, "BC"), (a, d, "AD"), (d, c, "DC")] {
        builder
            .add_straight_edge(from, to, label)
            .unwrap_or_else(|err| panic!("sample edge {label}: {err}"));
    }
    Arc::new(builder.build())
}

/// `base` shifted by whole minutes.
pub fn minutes_after(base: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
    base + chrono::Duration::minutes(minutes)
}

/// Build a path over raw edge indices.
///
/// # Panics
/// Panics if `edges` is empty or `arrival` precedes `departure`.
pub fn path(edges: &[usize], departure: DateTime<Utc>, arrival: DateTime<Utc>) -> GraphPath {
    GraphPath::new(
        edges.iter().copied().map(EdgeId::new).collect(),
        departure,
        arrival,
    )
    .unwrap_or_else(|err| panic!("invalid test path: {err}"))
}

/// One scripted answer to [`SearchRun::run_search`].
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Return a tree holding these paths.
    Tree(Vec<GraphPath>),
    /// Return no tree, as a solver that aborted early would.
    NoTree,
    /// Sleep, then return a tree holding these paths.
    Delayed(Duration, Vec<GraphPath>),
    /// Abort the request's search context, then return these paths.
    AbortAfter(Vec<GraphPath>),
}

#[derive(Debug, Default)]
struct Script {
    steps: VecDeque<ScriptStep>,
    repeat: Option<ScriptStep>,
    targets: Vec<usize>,
    deadlines: Vec<Deadline>,
    max_links: usize,
}

impl Script {
    fn next_step(&mut self) -> ScriptStep {
        self.steps
            .pop_front()
            .or_else(|| self.repeat.clone())
            .unwrap_or(ScriptStep::Tree(Vec::new()))
    }
}

/// `PathSolver` replaying a fixed script of subsearch results.
///
/// Clones share the script and the record of subsearches, so a test can
/// keep one clone for inspection after handing another to the
/// orchestrator. Once the script runs out, every subsearch yields an empty
/// tree.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSolver {
    script: Arc<Mutex<Script>>,
    refuse_start: bool,
}

impl ScriptedSolver {
    /// Replay `steps` in order.
    pub fn new(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        let script = Script {
            steps: steps.into_iter().collect(),
            ..Script::default()
        };
        Self {
            script: Arc::new(Mutex::new(script)),
            refuse_start: false,
        }
    }

    /// Answer every subsearch with `step`.
    pub fn repeating(step: ScriptStep) -> Self {
        let script = Script {
            repeat: Some(step),
            ..Script::default()
        };
        Self {
            script: Arc::new(Mutex::new(script)),
            refuse_start: false,
        }
    }

    /// A solver that never starts a run.
    pub fn refusing() -> Self {
        Self {
            refuse_start: true,
            ..Self::default()
        }
    }

    /// Itinerary target seen by each subsearch, in order.
    pub fn targets(&self) -> Vec<usize> {
        self.lock().targets.clone()
    }

    /// Deadline passed to each subsearch, in order.
    pub fn deadlines(&self) -> Vec<Deadline> {
        self.lock().deadlines.clone()
    }

    /// Largest number of temporary links observed during any subsearch.
    pub fn max_links_seen(&self) -> usize {
        self.lock().max_links
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PathSolver for ScriptedSolver {
    type Run = ScriptedRun;

    fn start_search(&self, request: &RoutingRequest, _deadline: Deadline) -> Option<Self::Run> {
        (!self.refuse_start).then(|| ScriptedRun {
            request: request.clone(),
            script: Arc::clone(&self.script),
        })
    }
}

/// Run handed out by [`ScriptedSolver`].
#[derive(Debug)]
pub struct ScriptedRun {
    request: RoutingRequest,
    script: Arc<Mutex<Script>>,
}

impl SearchRun for ScriptedRun {
    fn request(&self) -> &RoutingRequest {
        &self.request
    }

    fn request_mut(&mut self) -> &mut RoutingRequest {
        &mut self.request
    }

    fn run_search(&mut self, deadline: Deadline) -> Option<ShortestPathTree> {
        let links = self
            .request
            .context()
            .map_or(0, |context| context.graph().temporary_link_count());
        let step = {
            let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
            script.targets.push(self.request.num_itineraries());
            script.deadlines.push(deadline);
            script.max_links = script.max_links.max(links);
            script.next_step()
        };
        match step {
            ScriptStep::Tree(paths) => Some(ShortestPathTree::new(paths, 0)),
            ScriptStep::NoTree => None,
            ScriptStep::Delayed(pause, paths) => {
                std::thread::sleep(pause);
                Some(ShortestPathTree::new(paths, 0))
            }
            ScriptStep::AbortAfter(paths) => {
                if let Some(context) = self.request.context() {
                    context.abort();
                }
                Some(ShortestPathTree::new(paths, 0))
            }
        }
    }
}
