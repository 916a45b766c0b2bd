use assert_matches::assert_matches;
use bytes::Bytes;
use cassa::client::column_family::{ColumnSelection, RangeOptions};
use cassa::pool::PoolKind;
use cassa::rpc::errors::DbError;
use cassa::rpc::Consistency;
use cassa::rpc::types::{ColumnOrSuperColumn, KeySlice};
use cassa::testing::Fault;
use cassa::ExecutionError;

use crate::utils::{create_new_session_builder, ordered_session_builder, setup_tracing, test_cluster};

fn names(row: &[ColumnOrSuperColumn]) -> Vec<String> {
    row.iter()
        .map(|c| String::from_utf8_lossy(c.name()).into_owned())
        .collect()
}

fn keys(rows: &[KeySlice]) -> Vec<String> {
    rows.iter()
        .map(|row| String::from_utf8_lossy(&row.key).into_owned())
        .collect()
}

#[test]
fn removing_columns_and_rows() {
    setup_tracing();
    let cluster = test_cluster(2);
    let session = create_new_session_builder(&cluster)
        .build(cluster.connector())
        .unwrap();
    let cf = session.column_family("Standard1");

    cf.insert("k", [("a", "1"), ("b", "2"), ("c", "3"), ("d", "4")])
        .unwrap();
    cf.remove("k", Some(vec![Bytes::from_static(b"a")])).unwrap();
    cf.remove("k", Some(vec![Bytes::from_static(b"b"), Bytes::from_static(b"c")]))
        .unwrap();
    assert_eq!(names(&cf.get("k", &Default::default()).unwrap()), ["d"]);

    cf.remove("k", None).unwrap();
    assert_matches!(
        cf.get("k", &Default::default()),
        Err(ExecutionError::DbError(DbError::NotFound))
    );
    // Writes after the row deletion are visible again.
    cf.insert("k", [("e", "5")]).unwrap();
    assert_eq!(names(&cf.get("k", &Default::default()).unwrap()), ["e"]);

    // An empty column list removes the whole row too.
    cf.insert("k", [("f", "6"), ("g", "7")]).unwrap();
    cf.remove("k", Some(vec![])).unwrap();
    assert_matches!(
        cf.get("k", &Default::default()),
        Err(ExecutionError::DbError(DbError::NotFound))
    );

    cf.insert("k", [("h", "8")]).unwrap();
    let batch = cf.batch();
    batch.remove("k", Some(vec![])).unwrap();
    batch.send().unwrap();
    assert_matches!(
        cf.get("k", &Default::default()),
        Err(ExecutionError::DbError(DbError::NotFound))
    );
}

#[test]
fn column_family_batch_with_own_queue_size() {
    setup_tracing();
    let cluster = test_cluster(1);
    let session = create_new_session_builder(&cluster)
        .batch_queue_size(Some(100))
        .build(cluster.connector())
        .unwrap();
    let cf = session.column_family("Standard1");

    let batch = cf.batch_with_queue_size(Some(2));
    for key in ["a", "b", "c", "d", "e"] {
        batch.insert(key, [("c", "v")]).unwrap();
    }
    batch.send().unwrap();
    assert_eq!(cluster.batch_mutate_sizes(), [2, 2, 1]);

    let unbounded = cf.batch_with_queue_size(None);
    for i in 0..300 {
        unbounded.insert(format!("k{i}"), [("c", "v")]).unwrap();
    }
    assert_eq!(unbounded.pending_count(), 300);
    unbounded.send().unwrap();
    assert_eq!(cluster.batch_mutate_sizes(), [2, 2, 1, 300]);
}

#[test]
fn range_scan_survives_failover_between_pages() {
    setup_tracing();
    let cluster = test_cluster(2);
    let servers = cluster.servers();
    let session = ordered_session_builder(&cluster)
        .pool(PoolKind::queue())
        .build(cluster.connector())
        .unwrap();
    let cf = session.column_family("Standard1").with_buffer_size(3);
    let expected: Vec<String> = (0..10).map(|i| format!("key{i:02}")).collect();
    cf.batch_insert(expected.iter().map(|k| (k.clone(), [("c", "v")])))
        .unwrap();

    let mut scan = cf.get_range(RangeOptions::default(), &ColumnSelection::default());
    let mut rows = scan
        .by_ref()
        .take(3)
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    cluster.inject_fault(&servers[0], Fault::Reset);
    rows.extend(scan.map(Result::unwrap));

    assert_eq!(keys(&rows), expected);
    assert!(cluster.calls(&servers[1]) > 0);
}

#[test]
fn range_scan_honours_bounds_and_row_count() {
    setup_tracing();
    let cluster = test_cluster(1);
    let session = create_new_session_builder(&cluster)
        .build(cluster.connector())
        .unwrap();
    let cf = session.column_family("Standard1").with_buffer_size(2);
    cf.batch_insert((0..8).map(|i| (format!("r{i}"), [("c", "v")])))
        .unwrap();

    let rows = cf
        .get_range(
            RangeOptions {
                start: Bytes::from_static(b"r2"),
                finish: Bytes::from_static(b"r6"),
                row_count: None,
            },
            &ColumnSelection::default(),
        )
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(keys(&rows), ["r2", "r3", "r4", "r5", "r6"]);

    let rows = cf
        .get_range(
            RangeOptions {
                row_count: Some(3),
                ..Default::default()
            },
            &ColumnSelection::default(),
        )
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(keys(&rows), ["r0", "r1", "r2"]);
}

#[test]
fn counts_follow_the_selection() {
    setup_tracing();
    let cluster = test_cluster(1);
    let session = create_new_session_builder(&cluster)
        .build(cluster.connector())
        .unwrap();
    let cf = session.column_family("Standard1");
    cf.insert("x", [("a", "1"), ("b", "2"), ("c", "3")]).unwrap();
    cf.insert("y", [("a", "1")]).unwrap();

    assert_eq!(cf.get_count("x", &Default::default()).unwrap(), 3);
    assert_eq!(
        cf.get_count("x", &ColumnSelection::range("b", "", 100)).unwrap(),
        2
    );
    let counts = cf
        .multiget_count(["y", "missing", "x"], &ColumnSelection::columns(["a", "c"]))
        .unwrap();
    assert_eq!(
        counts,
        [
            (Bytes::from_static(b"y"), 1),
            (Bytes::from_static(b"missing"), 0),
            (Bytes::from_static(b"x"), 2),
        ]
    );
}

#[test]
fn consistency_overrides_reach_the_server() {
    setup_tracing();
    let cluster = test_cluster(1);
    let session = create_new_session_builder(&cluster)
        .read_consistency(Consistency::Quorum)
        .build(cluster.connector())
        .unwrap();
    assert_eq!(session.read_consistency(), Consistency::Quorum);

    let cf = session
        .column_family("Standard1")
        .with_write_consistency(Consistency::All);
    cf.insert("k", [("a", "1")]).unwrap();
    assert_eq!(names(&cf.get("k", &Default::default()).unwrap()), ["a"]);
}
