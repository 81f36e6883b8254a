mod common;

use common::{article, Article};
use ezstore_core::{
    Context, EntityStore, Predicate, SortDescriptor, SqliteEntityStore, StoreConfig, StoreError,
};

#[test]
fn insert_stages_until_commit() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::file(dir.path().join("store.db"));
    let writer_ctx = Context::open(&config).unwrap();
    let reader_ctx = Context::open(&config).unwrap();
    let writer = SqliteEntityStore::<Article>::new(&writer_ctx);
    let reader = SqliteEntityStore::<Article>::new(&reader_ctx);

    writer.insert(article(1, "draft")).unwrap();
    assert!(writer_ctx.has_changes());
    assert_eq!(writer.count().unwrap(), 1);
    assert_eq!(reader.count().unwrap(), 0);

    writer.commit().unwrap();
    assert!(!writer_ctx.has_changes());
    assert_eq!(reader.count().unwrap(), 1);
}

#[test]
fn discard_drops_staged_writes() {
    let ctx = Context::open_in_memory().unwrap();
    let store = SqliteEntityStore::<Article>::new(&ctx);
    store.insert(article(1, "kept")).unwrap();
    store.commit().unwrap();

    store.insert(article(2, "dropped")).unwrap();
    ctx.discard().unwrap();

    let titles: Vec<String> = store
        .read_all()
        .unwrap()
        .into_iter()
        .map(|managed| managed.into_inner().title)
        .collect();
    assert_eq!(titles, vec!["kept".to_string()]);
}

#[test]
fn read_matching_filters_and_sorts_with_stable_ties() {
    let ctx = Context::open_in_memory().unwrap();
    let store = SqliteEntityStore::<Article>::new(&ctx);
    for (id, title, rating, published) in [
        (1, "b", 4.0, true),
        (2, "a", 4.0, true),
        (3, "c", 1.5, false),
        (4, "d", 5.0, true),
    ] {
        let mut value = article(id, title);
        value.rating = rating;
        value.published = published;
        store.insert(value).unwrap();
    }

    let found = store
        .read_matching(
            &Predicate::eq("published", true),
            &[SortDescriptor::desc("rating")],
        )
        .unwrap();
    let ids: Vec<i64> = found.iter().map(|managed| managed.id).collect();
    assert_eq!(ids, vec![4, 1, 2]);

    let cheap_or_first = Predicate::lt("rating", 2).or(Predicate::eq("title", "b"));
    assert_eq!(store.count_matching(&cheap_or_first).unwrap(), 2);
}

#[test]
fn null_attributes_match_is_null_predicate() {
    let ctx = Context::open_in_memory().unwrap();
    let store = SqliteEntityStore::<Article>::new(&ctx);
    let mut summarized = article(1, "with summary");
    summarized.summary = Some("short".to_string());
    store.insert(summarized).unwrap();
    store.insert(article(2, "without summary")).unwrap();

    let missing = store.read_matching(&Predicate::is_null("summary"), &[]).unwrap();
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].id, 2);
    assert_eq!(missing[0].summary, None);
}

#[test]
fn update_persists_mutations_and_rejects_deleted_objects() {
    let ctx = Context::open_in_memory().unwrap();
    let store = SqliteEntityStore::<Article>::new(&ctx);
    let mut managed = store.insert(article(1, "before")).unwrap();
    let object_id = managed.object_id();

    managed.title = "after".to_string();
    store.update(&managed).unwrap();
    let reread = store.read_first(&Predicate::eq("id", 1)).unwrap().unwrap();
    assert_eq!(reread.object_id(), object_id);
    assert_eq!(reread.title, "after");

    store.delete(reread, true).unwrap();
    match store.update(&managed) {
        Err(StoreError::NotFound(missing)) => assert_eq!(missing, object_id),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn deleting_twice_is_a_noop() {
    let ctx = Context::open_in_memory().unwrap();
    let store = SqliteEntityStore::<Article>::new(&ctx);
    store.insert(article(1, "only")).unwrap();

    let first = store.read_first(&Predicate::True).unwrap().unwrap();
    let second = store.read_first(&Predicate::True).unwrap().unwrap();
    store.delete(first, false).unwrap();
    store.delete(second, true).unwrap();

    assert_eq!(store.count().unwrap(), 0);
}

#[test]
fn delete_all_except_keeps_listed_objects() {
    let ctx = Context::open_in_memory().unwrap();
    let store = SqliteEntityStore::<Article>::new(&ctx);
    let keep = store.insert(article(1, "keep")).unwrap();
    store.insert(article(2, "drop")).unwrap();
    store.insert(article(3, "drop")).unwrap();

    let removed = store.delete_all_except(&[keep.object_id()], true).unwrap();

    assert_eq!(removed, 2);
    assert_eq!(store.count().unwrap(), 1);
    assert_eq!(store.delete_all(true).unwrap(), 1);
}

#[test]
fn undeclared_attribute_in_predicate_is_rejected() {
    let ctx = Context::open_in_memory().unwrap();
    let store = SqliteEntityStore::<Article>::new(&ctx);

    let err = store
        .read_matching(&Predicate::eq("author", "x"), &[])
        .unwrap_err();

    assert!(matches!(err, StoreError::UnknownAttribute { ref attribute, .. } if attribute == "author"));
}
