#![expect(
    clippy::expect_used,
    reason = "tests should fail fast when setup breaks"
)]

//! Writer serialisation seen from outside the crate.

use std::sync::Arc;
use std::thread;

use geo::{Coord, Geometry, Point};
use ratikka_core::{
    Alert, AlertSource, EdgeId, Graph, ShutdownPolicy, TaskOutcome, UpdateManager, Validity,
    WriterTask,
};
use rstest::rstest;

fn single_edge_graph() -> (Arc<Graph>, EdgeId) {
    let mut builder = Graph::builder();
    let a = builder.add_vertex("A", Coord { x: 24.93, y: 60.17 });
    let b = builder.add_vertex("B", Coord { x: 24.94, y: 60.17 });
    let edge = builder.add_straight_edge(a, b, "AB").expect("edge AB");
    (Arc::new(builder.build()), edge)
}

fn tagged(feed: usize, sequence: usize) -> Alert {
    Alert::new(
        AlertSource::new(format!("feed-{feed}"), sequence.to_string()),
        "works",
        "",
        Validity::always(),
        Geometry::Point(Point::new(24.935, 60.17)),
    )
}

#[rstest]
#[case(2, 50)]
#[case(4, 25)]
fn concurrent_submitters_keep_their_own_order(#[case] submitters: usize, #[case] per_thread: usize) {
    let (graph, edge) = single_edge_graph();
    let manager = UpdateManager::start(Arc::clone(&graph)).expect("start manager");

    thread::scope(|scope| {
        for feed in 0..submitters {
            let handle = manager.handle();
            scope.spawn(move || {
                for sequence in 0..per_thread {
                    let alert = tagged(feed, sequence);
                    handle
                        .submit(WriterTask::new("append", move |writer| {
                            writer.update_alerts(edge, |current| {
                                current.iter().cloned().chain([alert]).collect()
                            })?;
                            Ok(())
                        }))
                        .expect("manager accepting");
                }
            });
        }
    });
    let barrier = manager
        .submit(WriterTask::new("barrier", |_| Ok(())))
        .expect("manager accepting");
    assert_eq!(barrier.blocking_wait(), Some(TaskOutcome::Completed));

    let alerts = graph.alerts(edge).expect("edge exists");
    assert_eq!(alerts.len(), submitters * per_thread);
    for feed in 0..submitters {
        let feed_id = format!("feed-{feed}");
        let sequence: Vec<usize> = alerts
            .iter()
            .filter(|alert| alert.source.feed_id == feed_id)
            .map(|alert| alert.source.external_id.parse().expect("numeric id"))
            .collect();
        assert_eq!(sequence, (0..per_thread).collect::<Vec<_>>());
    }
    manager.shutdown(ShutdownPolicy::Drain);
}

#[rstest]
fn readers_only_see_whole_alert_sets() {
    let (graph, edge) = single_edge_graph();
    let manager = UpdateManager::start(Arc::clone(&graph)).expect("start manager");
    let batch = 8;

    let reader_graph = Arc::clone(&graph);
    let reader = thread::spawn(move || {
        for _ in 0..2_000 {
            let seen = reader_graph.alerts(edge).expect("edge exists").len();
            assert_eq!(seen % batch, 0, "observed a partial batch of {seen}");
        }
    });

    for round in 0..20 {
        manager
            .submit(WriterTask::new("batch", move |writer| {
                let alerts = (0..batch).map(|sequence| tagged(round, sequence)).collect();
                writer.replace_alerts(edge, alerts)?;
                Ok(())
            }))
            .expect("manager accepting");
    }
    manager.shutdown(ShutdownPolicy::Drain);
    reader.join().expect("reader thread");

    assert_eq!(graph.alerts(edge).map(|alerts| alerts.len()), Some(batch));
}
