use docket::collection::FindOptions;
use docket::common::{order_by, SortOrder};
use docket::doc;
use docket::errors::ErrorKind;
use docket::filter::all;
use docket_int_test::test_util::create_test_db;

#[test]
fn test_get_more_walks_all_batches() {
    let db = create_test_db().unwrap();
    let coll = db.collection("batches").unwrap();
    for n in 0..25 {
        coll.insert(doc! { n: n }).unwrap();
    }

    let mut batch = db
        .find("batches", &doc! {}, FindOptions::new().with_batch_size(10))
        .unwrap();
    let mut total = batch.docs.len();
    while !batch.exhausted {
        batch = db.get_more(batch.cursor_id, None).unwrap();
        total += batch.docs.len();
    }
    assert_eq!(total, 25);
    assert_eq!(db.open_cursors(), 0);
}

#[test]
fn test_cursor_tolerates_concurrent_mutation() {
    let db = create_test_db().unwrap();
    let coll = db.collection("mutating").unwrap();
    for n in 0..30 {
        coll.insert(doc! { n: n }).unwrap();
    }

    let mut batch = db
        .find("mutating", &doc! {}, FindOptions::new().with_batch_size(5))
        .unwrap();

    // interleave writes with iteration: delete, insert, and update between
    // batches; the cursor must keep working (result set is best-effort)
    coll.delete(docket::filter::field("n").lt(10.into()), Default::default())
        .unwrap();
    coll.insert(doc! { n: 100 }).unwrap();
    coll.update(
        docket::filter::field("n").gt(20.into()),
        &doc! { "$set": { touched: true } },
        docket::collection::UpdateOptions::multi(),
    )
    .unwrap();

    let mut seen = batch.docs.len();
    while !batch.exhausted {
        batch = db.get_more(batch.cursor_id, None).unwrap();
        seen += batch.docs.len();
    }
    // the snapshot view yields the original record set
    assert_eq!(seen, 30);
}

#[test]
fn test_batch_ordering_never_regresses_under_updates() {
    let db = create_test_db().unwrap();
    let coll = db.collection("ensure_sorted").unwrap();
    for n in 0..12 {
        coll.insert(doc! { n: n }).unwrap();
    }

    let options = FindOptions::new()
        .with_sort(order_by("n", SortOrder::Ascending))
        .with_batch_size(4);
    let mut batch = db.find("ensure_sorted", &doc! {}, options).unwrap();

    let mut emitted: Vec<i64> = Vec::new();
    loop {
        emitted.extend(batch.docs.iter().filter_map(|d| d.get("n").as_i64()));
        // move an already-returned document's sort key past the cursor
        coll.update(
            docket::filter::field("n").eq(1.into()),
            &doc! { "$set": { n: 1000 } },
            Default::default(),
        )
        .ok();
        if batch.exhausted {
            break;
        }
        batch = db.get_more(batch.cursor_id, None).unwrap();
    }

    // documents already returned are never re-emitted or reordered
    let mut sorted = emitted.clone();
    sorted.sort();
    assert_eq!(emitted, sorted);
    let unique: std::collections::HashSet<i64> = emitted.iter().copied().collect();
    assert_eq!(unique.len(), emitted.len());
}

#[test]
fn test_collection_drop_invalidates_cursors() {
    let db = create_test_db().unwrap();
    let coll = db.collection("doomed").unwrap();
    for n in 0..20 {
        coll.insert(doc! { n: n }).unwrap();
    }

    let batch = db
        .find("doomed", &doc! {}, FindOptions::new().with_batch_size(3))
        .unwrap();
    assert!(db.drop_collection("doomed").unwrap());

    let err = db.get_more(batch.cursor_id, None).unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::CursorNotFound);
}

#[test]
fn test_kill_cursors() {
    let db = create_test_db().unwrap();
    let coll = db.collection("killed").unwrap();
    for n in 0..20 {
        coll.insert(doc! { n: n }).unwrap();
    }
    let batch = db
        .find("killed", &doc! {}, FindOptions::new().with_batch_size(3))
        .unwrap();
    assert!(db.kill_cursor(batch.cursor_id));
    let err = db.get_more(batch.cursor_id, None).unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::CursorNotFound);
}

#[test]
fn test_aggregate_batched_cursor() {
    let db = create_test_db().unwrap();
    let coll = db.collection("agg_cursor").unwrap();
    for n in 0..10 {
        coll.insert(doc! { n: n }).unwrap();
    }

    let mut batch = db
        .aggregate(
            "agg_cursor",
            &[doc! { "$match": { n: { "$gte": 2 } } }],
            Some(3),
        )
        .unwrap();
    let mut total = batch.docs.len();
    while !batch.exhausted {
        batch = db.get_more(batch.cursor_id, None).unwrap();
        total += batch.docs.len();
    }
    assert_eq!(total, 8);
}

#[test]
fn test_sorted_results_with_projection() {
    let db = create_test_db().unwrap();
    let coll = db.collection("shaped").unwrap();
    coll.insert(doc! { n: 2, tag: "b" }).unwrap();
    coll.insert(doc! { n: 1, tag: "a" }).unwrap();

    let options = FindOptions::new()
        .with_sort(order_by("n", SortOrder::Ascending))
        .with_projection(docket::collection::Projection::include_without_id(&["tag"]));
    let results = coll.find(all(), options).unwrap().try_collect().unwrap();
    assert_eq!(results, vec![doc! { tag: "a" }, doc! { tag: "b" }]);
}
