use docket::collection::FindOptions;
use docket::common::Value;
use docket::doc;
use docket::errors::ErrorKind;
use docket::filter::{all, and, field, or, parse_filter};
use docket_int_test::test_util::create_test_db;

#[test]
fn test_nan_ordering_property() {
    let db = create_test_db().unwrap();
    let coll = db.collection("nan").unwrap();
    coll.insert(doc! { v: (f64::NAN) }).unwrap();
    coll.insert(doc! { v: (1.0) }).unwrap();
    coll.insert(doc! { v: (f64::INFINITY) }).unwrap();

    // v < NaN and v > NaN are false for every stored v
    assert_eq!(coll.count(field("v").lt(f64::NAN.into())).unwrap(), 0);
    assert_eq!(coll.count(field("v").gt(f64::NAN.into())).unwrap(), 0);

    // equality matches only NaN
    assert_eq!(coll.count(field("v").eq(f64::NAN.into())).unwrap(), 1);

    // $lte/$gte against NaN match only the NaN document
    assert_eq!(coll.count(field("v").lte(f64::NAN.into())).unwrap(), 1);
    assert_eq!(coll.count(field("v").gte(f64::NAN.into())).unwrap(), 1);

    // NaN documents stay out of ordinary ranges
    assert_eq!(coll.count(field("v").lt(f64::INFINITY.into())).unwrap(), 1);
}

#[test]
fn test_nan_ordering_through_an_index() {
    let db = create_test_db().unwrap();
    let coll = db.collection("nan_idx").unwrap();
    coll.create_index(
        docket::common::Fields::with_names(&["v"]).unwrap(),
        &docket::index::IndexOptions::default(),
    )
    .unwrap();
    coll.insert(doc! { v: (f64::NAN) }).unwrap();
    coll.insert(doc! { v: (5.0) }).unwrap();

    assert_eq!(coll.count(field("v").lt(10.0.into())).unwrap(), 1);
    assert_eq!(coll.count(field("v").lte(f64::NAN.into())).unwrap(), 1);
}

#[test]
fn test_null_matches_missing() {
    let db = create_test_db().unwrap();
    let coll = db.collection("nulls").unwrap();
    coll.insert(doc! { a: (Value::Null), tag: "explicit" }).unwrap();
    coll.insert(doc! { tag: "missing" }).unwrap();
    coll.insert(doc! { a: 1, tag: "present" }).unwrap();

    assert_eq!(coll.count(field("a").eq(Value::Null)).unwrap(), 2);
    assert_eq!(coll.count(field("a").exists(true)).unwrap(), 2);
    assert_eq!(coll.count(field("a").exists(false)).unwrap(), 1);
}

#[test]
fn test_elem_match_single_element_semantics() {
    let db = create_test_db().unwrap();
    let coll = db.collection("elem").unwrap();
    coll.insert(doc! { results: [82, 85, 88] }).unwrap();
    coll.insert(doc! { results: [75, 99] }).unwrap();

    let strict = parse_filter(&doc! {
        results: { "$elemMatch": { "$gte": 80, "$lt": 85 } },
    })
    .unwrap();
    assert_eq!(coll.count(strict).unwrap(), 1);

    // un-nested comparisons quantify per element independently
    let loose = and(vec![
        field("results").gte(80.into()),
        field("results").lt(85.into()),
    ]);
    assert_eq!(coll.count(loose).unwrap(), 2);
}

#[test]
fn test_or_uses_clause_wise_plans_with_dedup() {
    let db = create_test_db().unwrap();
    let coll = db.collection("or").unwrap();
    coll.create_index(
        docket::common::Fields::with_names(&["a"]).unwrap(),
        &docket::index::IndexOptions::default(),
    )
    .unwrap();
    coll.create_index(
        docket::common::Fields::with_names(&["b"]).unwrap(),
        &docket::index::IndexOptions::default(),
    )
    .unwrap();

    coll.insert(doc! { a: 1, b: 1 }).unwrap();
    coll.insert(doc! { a: 1, b: 2 }).unwrap();
    coll.insert(doc! { a: 2, b: 1 }).unwrap();

    // two documents match both clauses; each must be returned once
    let filter = or(vec![field("a").eq(1.into()), field("b").eq(1.into())]);
    assert_eq!(coll.count(filter).unwrap(), 3);
}

#[test]
fn test_regex_length_cap_fails_query() {
    let db = create_test_db().unwrap();
    let coll = db.collection("regex").unwrap();
    coll.insert(doc! { s: "abc" }).unwrap();

    let long_pattern = "a".repeat(20000);
    let spec = doc! { s: { "$regex": (long_pattern) } };
    let err = parse_filter(&spec).unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::RegexTooLong);

    // a reasonable pattern still works end to end
    let ok = parse_filter(&doc! { s: { "$regex": "^ab" } }).unwrap();
    assert_eq!(coll.count(ok).unwrap(), 1);
}

#[test]
fn test_unknown_hint_is_rejected() {
    let db = create_test_db().unwrap();
    let coll = db.collection("hints").unwrap();
    coll.insert(doc! { a: 1 }).unwrap();

    let err = coll
        .find(field("a").eq(1.into()), FindOptions::new().with_hint("no_such_index"))
        .unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::UnknownHint);
}

#[test]
fn test_positional_path_with_literal_fallback() {
    let db = create_test_db().unwrap();
    let coll = db.collection("positional").unwrap();
    coll.insert(doc! { a: [10, 20, 30] }).unwrap();
    coll.insert(doc! { a: [{ "0": "zero" }] }).unwrap();

    assert_eq!(coll.count(field("a.1").eq(20.into())).unwrap(), 1);
    // position 0 resolves to the sub-document, whose literal "0" field
    // matches through the fallback on deeper positions
    assert_eq!(coll.count(field("a.5").eq("zero".into())).unwrap(), 0);
    coll.insert(doc! { a: [1, { "5": "five" }] }).unwrap();
    assert_eq!(coll.count(field("a.5").eq("five".into())).unwrap(), 1);
}

#[test]
fn test_unsatisfiable_predicate_returns_empty_not_error() {
    let db = create_test_db().unwrap();
    let coll = db.collection("empty").unwrap();
    coll.insert(doc! { a: 1 }).unwrap();

    use docket::filter::MatchExpression;
    let filter = and(vec![field("a").eq(1.into()), MatchExpression::Nothing]);
    let results = coll
        .find(filter, FindOptions::new())
        .unwrap()
        .try_collect()
        .unwrap();
    assert!(results.is_empty());
}

#[test]
fn test_text_search_with_text_index() {
    let db = create_test_db().unwrap();
    let coll = db.collection("text").unwrap();
    coll.create_text_index("body").unwrap();
    coll.insert(doc! { body: "the quick brown fox" }).unwrap();
    coll.insert(doc! { body: "sleepy lazy dog" }).unwrap();

    assert_eq!(coll.count(field("body").text("FOX")).unwrap(), 1);
    assert_eq!(coll.count(field("body").text("fox dog")).unwrap(), 2);
    assert_eq!(coll.count(field("body").text("cat")).unwrap(), 0);
}

#[test]
fn test_whole_array_equality_through_index() {
    let db = create_test_db().unwrap();
    let coll = db.collection("arr_eq").unwrap();
    coll.create_index(
        docket::common::Fields::with_names(&["a"]).unwrap(),
        &docket::index::IndexOptions::default(),
    )
    .unwrap();
    coll.insert(doc! { a: [1, 2] }).unwrap();
    coll.insert(doc! { a: [1, 3] }).unwrap();

    let filter = field("a").eq(Value::Array(vec![Value::I32(1), Value::I32(2)]));
    assert_eq!(coll.count(filter).unwrap(), 1);
}

#[test]
fn test_find_all_and_projection() {
    let db = create_test_db().unwrap();
    let coll = db.collection("proj").unwrap();
    coll.insert(doc! { a: 1, b: { c: 2, d: 3 } }).unwrap();

    let options = FindOptions::new().with_projection(
        docket::collection::Projection::include_without_id(&["b.c"]),
    );
    let results = coll.find(all(), options).unwrap().try_collect().unwrap();
    assert_eq!(results, vec![doc! { b: { c: 2 } }]);
}
