#![expect(
    clippy::expect_used,
    reason = "tests should fail fast when setup breaks"
)]

//! End-to-end behaviour: feed snapshot to edge alerts through the writer.

use std::cell::RefCell;
use std::sync::Arc;

use chrono::{Duration, Utc};
use geo::Coord;
use ratikka_core::{EdgeId, Graph, UpdateManager};
use ratikka_updater::test_support::{StubFeed, winkki_feature};
use ratikka_updater::{FeedError, PollOutcome, PollingUpdater, PollingUpdaterConfig};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tokio::runtime::Runtime;

/// A point about 20 m north of edge E.
const NEAR_E: Coord<f64> = Coord {
    x: 24.935,
    y: 60.170_18,
};

struct Street {
    graph: Arc<Graph>,
    edge: EdgeId,
    manager: UpdateManager,
    updater: PollingUpdater<StubFeed>,
}

/// State shared by the steps of one scenario.
pub struct PollingWorld {
    runtime: Runtime,
    feed: StubFeed,
    street: RefCell<Option<Street>>,
    last: RefCell<Option<PollOutcome>>,
}

impl PollingWorld {
    fn with_street<T>(&self, action: impl FnOnce(&mut Street) -> T) -> T {
        let mut street = self.street.borrow_mut();
        action(street.as_mut().expect("street built"))
    }
}

#[fixture]
fn world() -> PollingWorld {
    PollingWorld {
        runtime: tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("tokio runtime"),
        feed: StubFeed::new(),
        street: RefCell::new(None),
        last: RefCell::new(None),
    }
}

#[given("a street with edge E")]
fn street_with_edge(world: &PollingWorld) {
    let mut builder = Graph::builder();
    let a = builder.add_vertex("A", Coord { x: 24.930, y: 60.170 });
    let b = builder.add_vertex("B", Coord { x: 24.940, y: 60.170 });
    let edge = builder.add_straight_edge(a, b, "E").expect("edge E");
    let graph = Arc::new(builder.build());
    let manager = UpdateManager::start(Arc::clone(&graph)).expect("start manager");

    let mut updater = PollingUpdater::new(world.feed.clone());
    updater
        .configure(PollingUpdaterConfig::new("http://localhost:8080/wfs"))
        .expect("valid config");
    world
        .runtime
        .block_on(updater.setup())
        .expect("stub setup succeeds");

    *world.street.borrow_mut() = Some(Street {
        graph,
        edge,
        manager,
        updater,
    });
}

#[given("the feed reports a Kaivulupa work near E valid for the next hour")]
fn active_work(world: &PollingWorld) {
    let now = Utc::now();
    world.feed.set_features(vec![winkki_feature(
        "2024-0001",
        "Kaivulupa",
        NEAR_E,
        Some(now - Duration::hours(1)),
        Some(now + Duration::hours(1)),
    )]);
}

#[given("the feed reports a work near E that ended an hour ago")]
fn expired_work(world: &PollingWorld) {
    let now = Utc::now();
    world.feed.set_features(vec![winkki_feature(
        "2024-0002",
        "Kaivulupa",
        NEAR_E,
        Some(now - Duration::hours(3)),
        Some(now - Duration::hours(1)),
    )]);
}

#[when("one polling cycle completes")]
fn one_cycle(world: &PollingWorld) {
    let outcome = world.with_street(|street| {
        let handle = street.manager.handle();
        world.runtime.block_on(async {
            let outcome = street
                .updater
                .poll_once(&handle)
                .await
                .expect("updater is set up");
            street.updater.settle().await;
            outcome
        })
    });
    *world.last.borrow_mut() = Some(outcome);
}

#[when("the work disappears from the feed")]
fn work_disappears(world: &PollingWorld) {
    world.feed.set_features(Vec::new());
}

#[when("the feed starts failing")]
fn feed_fails(world: &PollingWorld) {
    world.feed.set_error(FeedError::Http {
        url: "http://localhost:8080/wfs".to_owned(),
        status: 503,
    });
}

#[then("edge E carries {count} alerts")]
fn alert_count(world: &PollingWorld, count: usize) {
    let alerts = world.with_street(|street| street.graph.alerts(street.edge).expect("edge E"));
    assert_eq!(alerts.len(), count);
}

#[then("the alert on E is headed Kaivulupa")]
fn alert_header(world: &PollingWorld) {
    let alerts = world.with_street(|street| street.graph.alerts(street.edge).expect("edge E"));
    let alert = alerts.first().expect("one alert");
    assert_eq!(alert.header, "Kaivulupa");
    assert_eq!(alert.source.feed_id, "winkki");
    assert_eq!(alert.source.external_id, "2024-0001");
}

#[then("the last cycle reported a failed fetch")]
fn failed_fetch(world: &PollingWorld) {
    assert!(matches!(
        world.last.borrow().as_ref(),
        Some(PollOutcome::FetchFailed(_))
    ));
}

#[scenario(path = "tests/features/alert_polling.feature", index = 0)]
fn active_work_raises_alert(world: PollingWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/alert_polling.feature", index = 1)]
fn vanished_work_is_withdrawn(world: PollingWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/alert_polling.feature", index = 2)]
fn failing_feed_is_fail_static(world: PollingWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/alert_polling.feature", index = 3)]
fn expired_work_is_never_applied(world: PollingWorld) {
    let _ = world;
}
