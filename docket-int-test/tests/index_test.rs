use docket::collection::{FindOptions, Projection};
use docket::common::{Fields, SortOrder, Value};
use docket::doc;
use docket::errors::ErrorKind;
use docket::filter::{and, field};
use docket::index::IndexOptions;
use docket_int_test::test_util::create_test_db;

#[test]
fn test_index_duplicate_name_invariant() {
    let db = create_test_db().unwrap();
    let coll = db.collection("idx").unwrap();
    let fields = Fields::with_names(&["a"]).unwrap();

    // first creation succeeds
    assert!(coll
        .create_index_named("my_idx", fields.clone(), &IndexOptions::default())
        .unwrap());
    // exact duplicate succeeds idempotently without creating anything
    assert!(!coll
        .create_index_named("my_idx", fields.clone(), &IndexOptions::default())
        .unwrap());

    // same key pattern under a different name fails loudly
    let err = coll
        .create_index_named("other_name", fields, &IndexOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::CannotCreateIndex);

    // same name with a different key pattern fails too
    let err = coll
        .create_index_named(
            "my_idx",
            Fields::with_names(&["b"]).unwrap(),
            &IndexOptions::default(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::IndexKeySpecsConflict);
}

#[test]
fn test_multikey_parallel_array_invariant() {
    let db = create_test_db().unwrap();
    let coll = db.collection("parallel").unwrap();
    coll.create_index(
        Fields::with_names(&["a", "b"]).unwrap(),
        &IndexOptions::default(),
    )
    .unwrap();

    let err = coll.insert(doc! { a: [1, 2], b: [3, 4] }).unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::ParallelArrays);

    // no partial index entries remain: the same values are not findable
    assert_eq!(coll.count(field("a").eq(1.into())).unwrap(), 0);
    assert_eq!(coll.count(field("b").eq(3.into())).unwrap(), 0);

    // one array-valued field among the compound keys is fine
    coll.insert(doc! { a: [1, 2], b: 3 }).unwrap();
    assert_eq!(coll.count(field("a").eq(2.into())).unwrap(), 1);
}

#[test]
fn test_partial_index_selection_scenario() {
    let db = create_test_db().unwrap();
    let coll = db.collection("partial").unwrap();
    coll.create_index(
        Fields::with_names(&["a", "b"]).unwrap(),
        &IndexOptions::partial(field("b").lt(2.into())),
    )
    .unwrap();

    coll.insert(doc! { "_id": 0, a: 1, b: 1 }).unwrap();
    coll.insert(doc! { "_id": 1, a: 2, b: 1 }).unwrap();

    // {a: 1, b: 1} implies b < 2, so the partial index serves the query
    let filter = and(vec![field("a").eq(1.into()), field("b").eq(1.into())]);
    let explanation = coll.explain(filter.clone(), FindOptions::new()).unwrap();
    let exec = explanation.get("executionStats");
    let exec = exec.as_document().unwrap();
    assert_eq!(exec.get("indexName"), Value::from("a_1_b_1"));

    let results = coll.find(filter, FindOptions::new()).unwrap().try_collect().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].get("a"), Value::I32(1));
    assert_eq!(results[0].get("b"), Value::I32(1));
    assert_eq!(results[0].get("_id"), Value::I32(0));
}

#[test]
fn test_covered_query_examines_no_documents() {
    let db = create_test_db().unwrap();
    let coll = db.collection("covered").unwrap();
    coll.create_index(
        Fields::with_names(&["x", "y"]).unwrap(),
        &IndexOptions::default(),
    )
    .unwrap();
    for n in 0..20 {
        coll.insert(doc! { x: n, y: (n * 2), z: "payload" }).unwrap();
    }

    let options =
        FindOptions::new().with_projection(Projection::include_without_id(&["x", "y"]));
    let explanation = coll.explain(field("x").eq(7.into()), options).unwrap();
    let exec = explanation.get("executionStats");
    let exec = exec.as_document().unwrap();
    assert_eq!(exec.get("covered"), Value::Bool(true));
    assert_eq!(exec.get("totalDocsExamined"), Value::I64(0));
    assert_eq!(exec.get("nReturned"), Value::I64(1));
}

#[test]
fn test_multikey_index_never_covers() {
    let db = create_test_db().unwrap();
    let coll = db.collection("mk").unwrap();
    coll.create_index(Fields::with_names(&["tags"]).unwrap(), &IndexOptions::default())
        .unwrap();
    coll.insert(doc! { tags: ["a", "b"] }).unwrap();

    let options =
        FindOptions::new().with_projection(Projection::include_without_id(&["tags"]));
    let explanation = coll.explain(field("tags").eq("a".into()), options).unwrap();
    let exec = explanation.get("executionStats");
    let exec = exec.as_document().unwrap();
    assert_eq!(exec.get("covered"), Value::Bool(false));
}

#[test]
fn test_unique_index_enforced_after_backfill() {
    let db = create_test_db().unwrap();
    let coll = db.collection("uniq").unwrap();
    coll.insert(doc! { email: "a@x" }).unwrap();
    coll.create_index(
        Fields::with_names(&["email"]).unwrap(),
        &IndexOptions::unique(),
    )
    .unwrap();

    let err = coll.insert(doc! { email: "a@x" }).unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::DuplicateKey);
    assert_eq!(coll.count(docket::filter::all()).unwrap(), 1);
}

#[test]
fn test_sort_rides_descending_index() {
    let db = create_test_db().unwrap();
    let coll = db.collection("sorted").unwrap();
    coll.create_index(
        Fields::with_pairs(&[("score", SortOrder::Descending)]).unwrap(),
        &IndexOptions::default(),
    )
    .unwrap();
    for score in [10, 50, 30] {
        coll.insert(doc! { score: score }).unwrap();
    }

    let options = FindOptions::new()
        .with_sort(docket::common::order_by("score", SortOrder::Descending));
    let results = coll
        .find(field("score").gt(0.into()), options)
        .unwrap()
        .try_collect()
        .unwrap();
    let scores: Vec<Value> = results.iter().map(|d| d.get("score")).collect();
    assert_eq!(scores, vec![Value::I32(50), Value::I32(30), Value::I32(10)]);
}

#[test]
fn test_dropping_index_in_use_degrades_without_crash() {
    let db = create_test_db().unwrap();
    let coll = db.collection("drop_idx").unwrap();
    coll.create_index(Fields::with_names(&["n"]).unwrap(), &IndexOptions::default())
        .unwrap();
    for n in 0..50 {
        coll.insert(doc! { n: n }).unwrap();
    }

    let batch = db
        .find(
            "drop_idx",
            &doc! { n: { "$gte": 0 } },
            FindOptions::new().with_batch_size(5),
        )
        .unwrap();
    coll.drop_index("n_1").unwrap();

    // the cursor either keeps producing from its snapshot or reports an
    // error; both are acceptable, a crash is not
    let _ = db.get_more(batch.cursor_id, None);
}
