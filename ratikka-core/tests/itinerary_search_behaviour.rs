#![expect(
    clippy::expect_used,
    reason = "tests should fail fast when setup breaks"
)]

//! Behavioural coverage for the iterative itinerary search.

use std::cell::RefCell;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use geo::Coord;
use ratikka_core::{
    Deadline, EdgeId, Graph, GraphPath, ItinerarySearch, PathSolver, RoutingRequest, SearchError,
    SearchRun, SearchTimeouts, ShortestPathTree,
};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

/// k-shortest-paths stand-in: a run with target `k` returns the first `k`
/// known routes.
#[derive(Debug, Clone, Default)]
struct KnownRoutes {
    routes: Vec<GraphPath>,
    starts: bool,
    subsearches: Arc<Mutex<usize>>,
}

struct KnownRoutesRun {
    request: RoutingRequest,
    routes: Vec<GraphPath>,
    subsearches: Arc<Mutex<usize>>,
}

impl PathSolver for KnownRoutes {
    type Run = KnownRoutesRun;

    fn start_search(&self, request: &RoutingRequest, _deadline: Deadline) -> Option<Self::Run> {
        self.starts.then(|| KnownRoutesRun {
            request: request.clone(),
            routes: self.routes.clone(),
            subsearches: Arc::clone(&self.subsearches),
        })
    }
}

impl SearchRun for KnownRoutesRun {
    fn request(&self) -> &RoutingRequest {
        &self.request
    }

    fn request_mut(&mut self) -> &mut RoutingRequest {
        &mut self.request
    }

    fn run_search(&mut self, _deadline: Deadline) -> Option<ShortestPathTree> {
        *self.subsearches.lock().expect("subsearch counter") += 1;
        let paths = self
            .routes
            .iter()
            .take(self.request.num_itineraries())
            .cloned()
            .collect();
        Some(ShortestPathTree::new(paths, 0))
    }
}

/// State shared by the steps of one scenario.
pub struct SearchWorld {
    solver: RefCell<KnownRoutes>,
    result: RefCell<Option<Result<Vec<GraphPath>, SearchError>>>,
}

#[fixture]
fn world() -> SearchWorld {
    SearchWorld {
        solver: RefCell::new(KnownRoutes::default()),
        result: RefCell::new(None),
    }
}

fn ten() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0)
        .single()
        .expect("valid timestamp")
}

fn at(minutes: i64) -> DateTime<Utc> {
    ten() + Duration::minutes(minutes)
}

fn route(edge: usize, arrival_minutes: i64) -> GraphPath {
    GraphPath::new(vec![EdgeId::new(edge)], ten(), at(arrival_minutes)).expect("valid route")
}

fn graph() -> Arc<Graph> {
    let mut builder = Graph::builder();
    let a = builder.add_vertex("A", Coord { x: 24.93, y: 60.17 });
    let b = builder.add_vertex("B", Coord { x: 24.95, y: 60.17 });
    builder.add_straight_edge(a, b, "AB").expect("edge AB");
    Arc::new(builder.build())
}

#[given("a solver with {count} feasible routes")]
fn solver_with_routes(world: &SearchWorld, count: usize) {
    let routes = (0..count)
        .map(|edge| route(edge, 20 + i64::try_from(edge).expect("small index")))
        .collect();
    *world.solver.borrow_mut() = KnownRoutes {
        routes,
        starts: true,
        ..KnownRoutes::default()
    };
}

#[given("a solver whose routes arrive at 10:15, 10:05 and 10:30")]
fn solver_with_unordered_routes(world: &SearchWorld) {
    *world.solver.borrow_mut() = KnownRoutes {
        routes: vec![route(0, 15), route(1, 5), route(2, 30)],
        starts: true,
        ..KnownRoutes::default()
    };
}

#[given("a solver that cannot start")]
fn solver_that_cannot_start(world: &SearchWorld) {
    *world.solver.borrow_mut() = KnownRoutes::default();
}

#[when("I search for {count} itineraries departing at ten")]
fn search_for(world: &SearchWorld, count: usize) {
    let search = ItinerarySearch::new(
        graph(),
        world.solver.borrow().clone(),
        SearchTimeouts::from_secs_f64(5.0, 5.0),
    );
    let mut request = RoutingRequest::new(
        Coord { x: 24.93, y: 60.17 },
        Coord { x: 24.95, y: 60.17 },
        ten(),
    )
    .with_num_itineraries(count);
    *world.result.borrow_mut() = Some(search.find_itineraries(&mut request));
}

#[then("the search returns {count} itineraries")]
fn returns_count(world: &SearchWorld, count: usize) {
    let result = world.result.borrow();
    let itineraries = result
        .as_ref()
        .expect("search ran")
        .as_ref()
        .expect("itineraries found");
    assert_eq!(itineraries.len(), count);
}

#[then("the solver ran {count} subsearches")]
fn ran_subsearches(world: &SearchWorld, count: usize) {
    let solver = world.solver.borrow();
    assert_eq!(*solver.subsearches.lock().expect("subsearch counter"), count);
}

#[then("the itineraries arrive at 10:05, 10:15 and 10:30")]
fn ordered_by_arrival(world: &SearchWorld) {
    let result = world.result.borrow();
    let arrivals: Vec<_> = result
        .as_ref()
        .expect("search ran")
        .as_ref()
        .expect("itineraries found")
        .iter()
        .map(GraphPath::arrival)
        .collect();
    assert_eq!(arrivals, vec![at(5), at(15), at(30)]);
}

#[then("no itinerary is repeated")]
fn no_repeats(world: &SearchWorld) {
    let result = world.result.borrow();
    let itineraries = result
        .as_ref()
        .expect("search ran")
        .as_ref()
        .expect("itineraries found");
    for (index, itinerary) in itineraries.iter().enumerate() {
        assert!(
            !itineraries.iter().skip(index + 1).any(|other| other == itinerary),
            "itinerary {index} repeated"
        );
    }
}

#[then("the search reports that the engine could not start")]
fn engine_not_started(world: &SearchWorld) {
    let result = world.result.borrow();
    assert_eq!(
        result.as_ref().expect("search ran"),
        &Err(SearchError::SolverNotStarted)
    );
}

#[scenario(path = "tests/features/itinerary_search.feature", index = 0)]
fn single_feasible_path(world: SearchWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/itinerary_search.feature", index = 1)]
fn depart_after_ordering(world: SearchWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/itinerary_search.feature", index = 2)]
fn deduplication(world: SearchWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/itinerary_search.feature", index = 3)]
fn solver_start_failure(world: SearchWorld) {
    let _ = world;
}
