use docket::common::Value;
use docket::doc;
use docket::errors::ErrorKind;
use docket::filter::{all, field};
use docket_int_test::test_util::create_test_db;

#[test]
fn test_transaction_sees_one_consistent_snapshot() {
    let db = create_test_db().unwrap();
    let coll = db.collection("snap").unwrap();
    coll.insert(doc! { n: 1 }).unwrap();
    coll.insert(doc! { n: 2 }).unwrap();

    let session = db.create_session();
    let mut tx = session.begin_transaction().unwrap();
    assert_eq!(tx.find("snap", &all()).unwrap().len(), 2);

    // concurrent writes land outside the snapshot
    coll.insert(doc! { n: 3 }).unwrap();
    coll.delete(field("n").eq(1.into()), Default::default()).unwrap();

    let inside = tx.find("snap", &all()).unwrap();
    assert_eq!(inside.len(), 2);
    assert!(inside.iter().any(|d| d.get("n") == Value::I32(1)));
    tx.abort().unwrap();
}

#[test]
fn test_commit_publishes_atomically() {
    let db = create_test_db().unwrap();
    let accounts = db.collection("accounts").unwrap();
    accounts.insert(doc! { owner: "a", balance: 100 }).unwrap();
    accounts.insert(doc! { owner: "b", balance: 0 }).unwrap();

    let session = db.create_session();
    let mut tx = session.begin_transaction().unwrap();
    tx.update(
        "accounts",
        &field("owner").eq("a".into()),
        &doc! { "$inc": { balance: (-40) } },
    )
    .unwrap();
    tx.update(
        "accounts",
        &field("owner").eq("b".into()),
        &doc! { "$inc": { balance: 40 } },
    )
    .unwrap();

    // nothing moved yet
    assert_eq!(accounts.count(field("balance").eq(60.into())).unwrap(), 0);

    tx.commit().unwrap();
    assert_eq!(accounts.count(field("balance").eq(60.into())).unwrap(), 1);
    assert_eq!(accounts.count(field("balance").eq(40.into())).unwrap(), 1);
}

#[test]
fn test_later_committer_aborts_on_conflict() {
    let db = create_test_db().unwrap();
    let coll = db.collection("conflict").unwrap();
    coll.insert(doc! { counter: 0 }).unwrap();

    let session = db.create_session();
    let mut tx1 = session.begin_transaction().unwrap();
    let mut tx2 = session.begin_transaction().unwrap();

    tx1.update("conflict", &all(), &doc! { "$inc": { counter: 1 } })
        .unwrap();
    tx2.update("conflict", &all(), &doc! { "$inc": { counter: 10 } })
        .unwrap();

    tx1.commit().unwrap();
    let err = tx2.commit().unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::WriteConflict);

    // only the first committer's effect is visible
    assert_eq!(coll.count(field("counter").eq(1.into())).unwrap(), 1);
}

#[test]
fn test_failed_commit_leaves_no_partial_state() {
    let db = create_test_db().unwrap();
    let coll = db.collection("atomic").unwrap();
    coll.create_index(
        docket::common::Fields::with_names(&["u"]).unwrap(),
        &docket::index::IndexOptions::unique(),
    )
    .unwrap();
    coll.insert(doc! { u: 1 }).unwrap();

    let session = db.create_session();
    let mut tx = session.begin_transaction().unwrap();
    // the first insert is fine, the second collides with committed data
    tx.insert("atomic", doc! { u: 2 }).unwrap();
    tx.insert("atomic", doc! { u: 1 }).unwrap();

    let err = tx.commit().unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::DuplicateKey);

    // the successful buffered insert was rolled back with the failed one
    assert_eq!(coll.count(all()).unwrap(), 1);
    assert_eq!(coll.count(field("u").eq(2.into())).unwrap(), 0);
}

#[test]
fn test_transaction_spanning_collections() {
    let db = create_test_db().unwrap();
    db.collection("left").unwrap().insert(doc! { v: 1 }).unwrap();
    db.collection("right").unwrap();

    let session = db.create_session();
    let mut tx = session.begin_transaction().unwrap();
    let moved = tx.find("left", &all()).unwrap();
    assert_eq!(moved.len(), 1);
    tx.delete("left", &all()).unwrap();
    tx.insert("right", doc! { v: 1, moved: true }).unwrap();
    tx.commit().unwrap();

    assert_eq!(db.collection("left").unwrap().count(all()).unwrap(), 0);
    assert_eq!(db.collection("right").unwrap().count(all()).unwrap(), 1);
}
