use std::panic::{self, AssertUnwindSafe};
use std::thread;

use assert_matches::assert_matches;
use bytes::Bytes;
use cassa::batch::{InsertOptions, Mutator};
use cassa::pool::PoolKind;
use cassa::rpc::types::ColumnOrSuperColumn;
use cassa::ExecutionError;

use crate::utils::{create_new_session_builder, setup_tracing, test_cluster};

fn first_value(row: &[ColumnOrSuperColumn]) -> &Bytes {
    match row.first() {
        Some(ColumnOrSuperColumn::Column(column)) => &column.value,
        other => panic!("expected a plain column, got {other:?}"),
    }
}

#[test]
fn queue_flushes_every_queue_size_entries() {
    setup_tracing();
    for (entries, queue_size, expected) in [
        (7, 3, vec![3usize, 3, 1]),
        (6, 3, vec![3, 3]),
        (2, 5, vec![2]),
        (4, 1, vec![1, 1, 1, 1]),
    ] {
        let cluster = test_cluster(2);
        let session = create_new_session_builder(&cluster)
            .build(cluster.connector())
            .unwrap();
        let batch = session.batch_with_queue_size(Some(queue_size));
        for i in 0..entries {
            batch
                .insert(format!("key{i}"), "Standard1", [("col", "val")])
                .unwrap();
        }
        batch.send().unwrap();

        assert_eq!(cluster.batch_mutate_sizes(), expected, "{entries} entries, queue of {queue_size}");
        assert_eq!(batch.pending_count(), 0);
    }
}

#[test]
fn scope_sends_the_rest_on_exit() {
    setup_tracing();
    let cluster = test_cluster(1);
    let session = create_new_session_builder(&cluster)
        .batch_queue_size(Some(2))
        .build(cluster.connector())
        .unwrap();
    let users = session.column_family("Standard1");

    {
        let batch = users.batch();
        let scope = batch.scope();
        scope.insert("a", [("name", "Alice")]).unwrap();
        scope.insert("b", [("name", "Bob")]).unwrap();
        scope.insert("c", [("name", "Carol")]).unwrap();
        assert_eq!(cluster.batch_mutate_calls(), 1);
    }
    assert_eq!(cluster.batch_mutate_sizes(), [2, 1]);
    for key in ["a", "b", "c"] {
        assert_eq!(users.get(key, &Default::default()).unwrap().len(), 1);
    }
}

#[test]
fn failed_send_keeps_the_queue() {
    setup_tracing();
    let cluster = test_cluster(1);
    let server = cluster.servers().remove(0);
    let session = create_new_session_builder(&cluster)
        .pool(PoolKind::Null)
        .build(cluster.connector())
        .unwrap();
    let batch = session.batch_with_queue_size(None);
    batch
        .insert("a", "Standard1", [("x", "1")])
        .unwrap()
        .remove("b", "Standard1", None)
        .unwrap();

    cluster.stop(&server);
    assert_matches!(batch.send(), Err(ExecutionError::NoServerAvailable(_)));
    assert_eq!(batch.pending_count(), 2);

    cluster.start(&server);
    batch.send().unwrap();
    assert_eq!(batch.pending_count(), 0);
    assert_eq!(cluster.batch_mutate_sizes(), [2]);
}

#[test]
fn concurrent_writers_last_timestamp_wins() {
    setup_tracing();
    let cluster = test_cluster(2);
    let session = create_new_session_builder(&cluster)
        .pool(PoolKind::thread_local())
        .build(cluster.connector())
        .unwrap();
    let cf = session.column_family("Standard1");

    let writes: Vec<(i64, String)> = thread::scope(|s| {
        let writers: Vec<_> = (0..4)
            .map(|t| {
                let cf = cf.clone();
                s.spawn(move || {
                    (0..25)
                        .map(|i| {
                            let value = format!("{t}-{i}");
                            let ts = cf.insert("row", [("col", value.clone())]).unwrap();
                            (ts, value)
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        writers
            .into_iter()
            .flat_map(|writer| writer.join().unwrap())
            .collect()
    });

    let (_, newest) = writes.iter().max_by_key(|(ts, _)| *ts).unwrap();
    let row = cf.get("row", &Default::default()).unwrap();
    assert_eq!(first_value(&row), &Bytes::from(newest.clone()));

    let mut timestamps: Vec<i64> = writes.iter().map(|(ts, _)| *ts).collect();
    timestamps.sort_unstable();
    timestamps.dedup();
    assert_eq!(timestamps.len(), writes.len());
}

#[test]
fn explicit_timestamps_are_kept() {
    setup_tracing();
    let cluster = test_cluster(1);
    let session = create_new_session_builder(&cluster)
        .build(cluster.connector())
        .unwrap();
    let batch = session.batch();
    let older = InsertOptions {
        timestamp: Some(10),
        ..Default::default()
    };
    batch
        .insert("k", "Standard1", [("c", "new")])
        .unwrap()
        .insert_with("k", "Standard1", [("c", "old")], &older)
        .unwrap();
    batch.send().unwrap();

    let row = session
        .column_family("Standard1")
        .get("k", &Default::default())
        .unwrap();
    assert_eq!(first_value(&row), &Bytes::from_static(b"new"));
}

#[test]
#[ntest::timeout(20000)]
fn one_queue_shared_by_many_threads() {
    setup_tracing();
    let cluster = test_cluster(2);
    let session = create_new_session_builder(&cluster)
        .pool(PoolKind::queue())
        .build(cluster.connector())
        .unwrap();
    let batch = session.batch_with_queue_size(Some(10));

    thread::scope(|s| {
        for t in 0..4 {
            let batch = &batch;
            s.spawn(move || {
                for i in 0..25 {
                    batch
                        .insert(format!("{t}-{i}"), "Standard1", [("c", "v")])
                        .unwrap();
                    if i % 10 == 9 {
                        batch.remove(format!("{t}-{i}"), "Standard1", None).unwrap();
                    }
                }
            });
        }
    });
    batch.send().unwrap();

    let sizes = cluster.batch_mutate_sizes();
    assert!(sizes.iter().all(|&size| size <= 10), "{sizes:?}");
    // 100 inserts and 8 removals.
    assert_eq!(sizes.iter().sum::<usize>(), 108);
    assert_eq!(batch.pending_count(), 0);
}

#[test]
#[ntest::timeout(20000)]
fn concurrent_sends_lose_nothing() {
    setup_tracing();
    let cluster = test_cluster(2);
    let session = create_new_session_builder(&cluster)
        .pool(PoolKind::thread_local())
        .build(cluster.connector())
        .unwrap();
    let batch = session.batch_with_queue_size(None);

    thread::scope(|s| {
        for t in 0..4 {
            let batch = &batch;
            s.spawn(move || {
                for i in 0..20 {
                    batch
                        .insert(format!("{t}-{i}"), "Standard1", [("c", "v")])
                        .unwrap();
                    if i % 5 == 4 {
                        batch.send().unwrap();
                    }
                }
            });
        }
    });

    assert_eq!(batch.pending_count(), 0);
    assert_eq!(cluster.batch_mutate_sizes().iter().sum::<usize>(), 80);
    let keys: Vec<String> = (0..4)
        .flat_map(|t| (0..20).map(move |i| format!("{t}-{i}")))
        .collect();
    let rows = session
        .column_family("Standard1")
        .multiget(keys, &Default::default())
        .unwrap();
    assert_eq!(rows.len(), 80);
}

#[test]
#[ntest::timeout(10000)]
fn scope_sends_when_unwinding() {
    setup_tracing();
    let cluster = test_cluster(1);
    let session = create_new_session_builder(&cluster)
        .build(cluster.connector())
        .unwrap();
    let batch = session.batch();

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let scope = batch.scope();
        scope.insert("a", "Standard1", [("c", "v")]).unwrap();
        scope.insert("b", "Standard1", [("c", "v")]).unwrap();
        panic!("worker failed while the batch was open");
    }));

    assert!(result.is_err());
    assert_eq!(batch.pending_count(), 0);
    assert_eq!(cluster.batch_mutate_sizes(), [2]);
    let cf = session.column_family("Standard1");
    assert_eq!(cf.get("b", &Default::default()).unwrap().len(), 1);
}

fn write_pair(
    batch: &Mutator<'_>,
    first: &'static str,
    second: &[(&'static str, &'static str)],
) -> Result<(), ExecutionError> {
    let scope = batch.scope();
    scope.insert(first, "Standard1", [("c", "v")])?;
    scope.insert("second", "Standard1", second.iter().copied())?;
    scope.finish()
}

#[test]
#[ntest::timeout(10000)]
fn scope_sends_on_early_return() {
    setup_tracing();
    let cluster = test_cluster(1);
    let session = create_new_session_builder(&cluster)
        .build(cluster.connector())
        .unwrap();
    let batch = session.batch();

    // An insert without columns is rejected and returns through `?`.
    assert_matches!(
        write_pair(&batch, "first", &[]),
        Err(ExecutionError::InvalidArgument(_))
    );
    assert_eq!(batch.pending_count(), 0);
    assert_eq!(cluster.batch_mutate_sizes(), [1]);

    write_pair(&batch, "third", &[("c", "v")]).unwrap();
    assert_eq!(cluster.batch_mutate_sizes(), [1, 2]);
}
