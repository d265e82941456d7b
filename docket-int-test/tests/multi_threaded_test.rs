use docket::collection::FindOptions;
use docket::doc;
use docket::filter::{all, field};
use docket_int_test::test_util::create_test_db;
use std::sync::Arc;
use std::thread;

#[test]
fn test_concurrent_writers_and_readers() {
    let db = Arc::new(create_test_db().unwrap());
    let coll = db.collection("concurrent").unwrap();
    coll.create_index(
        docket::common::Fields::with_names(&["worker"]).unwrap(),
        &docket::index::IndexOptions::default(),
    )
    .unwrap();

    let mut handles = Vec::new();
    for worker in 0..4 {
        let db = db.clone();
        handles.push(thread::spawn(move || {
            let coll = db.collection("concurrent").unwrap();
            for n in 0..100 {
                coll.insert(doc! { worker: worker, n: n }).unwrap();
            }
        }));
    }
    for reader in 0..2 {
        let db = db.clone();
        handles.push(thread::spawn(move || {
            let coll = db.collection("concurrent").unwrap();
            for _ in 0..50 {
                // readers run against whatever snapshot they get; they must
                // never fail or observe torn documents
                let docs = coll
                    .find(field("worker").gte(0.into()), FindOptions::new())
                    .unwrap()
                    .try_collect()
                    .unwrap();
                for doc in docs {
                    assert!(doc.get("n").as_i64().is_some());
                }
                let _ = reader;
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(db.collection("concurrent").unwrap().count(all()).unwrap(), 400);
}

#[test]
fn test_concurrent_index_build_and_writes_serialize() {
    let db = Arc::new(create_test_db().unwrap());
    let coll = db.collection("builds").unwrap();
    for n in 0..200 {
        coll.insert(doc! { n: n }).unwrap();
    }

    let mut handles = Vec::new();
    {
        let db = db.clone();
        handles.push(thread::spawn(move || {
            let coll = db.collection("builds").unwrap();
            coll.create_index(
                docket::common::Fields::with_names(&["n"]).unwrap(),
                &docket::index::IndexOptions::default(),
            )
            .unwrap();
        }));
    }
    {
        let db = db.clone();
        handles.push(thread::spawn(move || {
            let coll = db.collection("builds").unwrap();
            for n in 200..300 {
                coll.insert(doc! { n: n }).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // the index observed every document regardless of interleaving
    let coll = db.collection("builds").unwrap();
    assert_eq!(coll.count(field("n").gte(0.into())).unwrap(), 300);
    let explanation = coll
        .explain(field("n").eq(250.into()), FindOptions::new())
        .unwrap();
    let exec = explanation.get("executionStats");
    let exec = exec.as_document().unwrap();
    assert_eq!(exec.get("nReturned"), docket::common::Value::I64(1));
}

#[test]
fn test_drop_collection_under_load_never_corrupts() {
    let db = Arc::new(create_test_db().unwrap());
    let coll = db.collection("volatile").unwrap();
    for n in 0..100 {
        coll.insert(doc! { n: n }).unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..3 {
        let db = db.clone();
        handles.push(thread::spawn(move || {
            // reads racing the drop may succeed or report the collection
            // gone; both outcomes are fine
            if let Ok(coll) = db.collection("volatile") {
                for _ in 0..20 {
                    let _ = coll
                        .find(all(), FindOptions::new())
                        .and_then(|mut c| c.try_collect());
                }
            }
        }));
    }
    {
        let db = db.clone();
        handles.push(thread::spawn(move || {
            let _ = db.drop_collection("volatile");
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
}
