use annotator_core::db::open_db_in_memory;
use annotator_core::{
    AnnotationRow, AnnotationStore, Feature, GoldLabel, KeyRegistry, Label, SqliteAnnotationStore,
    SqliteKeyRegistry, StoreError, UpsertOutcome, WriteMode,
};
use rusqlite::{params, Connection};

fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

fn insert_candidate(conn: &Connection, id: i64, class_name: &str, split: i64) {
    conn.execute(
        "INSERT INTO candidates (id, class_name, split, data) VALUES (?1, ?2, ?3, '{}');",
        params![id, class_name, split],
    )
    .unwrap();
}

fn feature_row(candidate_id: i64, pairs: &[(&str, f64)]) -> AnnotationRow<f64> {
    AnnotationRow::sparse::<Feature>(
        candidate_id,
        pairs.iter().map(|(key, value)| (key.to_string(), *value)),
    )
}

#[test]
fn upsert_inserts_then_reports_identical_rows_as_unchanged() {
    let conn = setup();
    insert_candidate(&conn, 1, "PartTemp", 0);
    let store = SqliteAnnotationStore::<Feature>::try_new(&conn).unwrap();
    let row = feature_row(1, &[("a", 1.0), ("b", 2.5)]);

    assert_eq!(
        store.upsert(&row, WriteMode::Replace).unwrap(),
        UpsertOutcome::Inserted
    );
    assert_eq!(
        store.upsert(&row, WriteMode::Replace).unwrap(),
        UpsertOutcome::Unchanged
    );
    assert_eq!(
        store.upsert(&row, WriteMode::AppendIfAbsent).unwrap(),
        UpsertOutcome::Unchanged
    );
    assert_eq!(store.get(1).unwrap(), Some(row));
    assert_eq!(store.count().unwrap(), 1);
}

#[test]
fn append_if_absent_keeps_a_differing_row() {
    let conn = setup();
    insert_candidate(&conn, 1, "PartTemp", 0);
    let store = SqliteAnnotationStore::<Feature>::try_new(&conn).unwrap();
    let stale = feature_row(1, &[("a", 1.0)]);
    let fresh = feature_row(1, &[("a", 2.0)]);

    store.upsert(&stale, WriteMode::Replace).unwrap();
    assert_eq!(
        store.upsert(&fresh, WriteMode::AppendIfAbsent).unwrap(),
        UpsertOutcome::KeptExisting
    );
    assert_eq!(store.get(1).unwrap(), Some(stale));

    assert_eq!(
        store.upsert(&fresh, WriteMode::Replace).unwrap(),
        UpsertOutcome::Replaced
    );
    assert_eq!(store.get(1).unwrap(), Some(fresh));
}

#[test]
fn stored_columns_are_parallel_json_arrays() {
    let conn = setup();
    insert_candidate(&conn, 4, "PartTemp", 0);
    let store = SqliteAnnotationStore::<Label>::try_new(&conn).unwrap();
    let row = AnnotationRow::sparse::<Label>(
        4,
        vec![
            ("lf_pos".to_string(), 1),
            ("lf_abstain".to_string(), 0),
            ("lf_neg".to_string(), -1),
        ],
    );

    store.upsert(&row, WriteMode::Replace).unwrap();

    let (keys, values): (String, String) = conn
        .query_row(
            "SELECT keys_json, values_json FROM labels WHERE candidate_id = 4;",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(keys, r#"["lf_pos","lf_neg"]"#);
    assert_eq!(values, "[1,-1]");
}

#[test]
fn rows_with_mismatched_columns_are_invalid_data() {
    let conn = setup();
    insert_candidate(&conn, 1, "PartTemp", 0);
    conn.execute(
        "INSERT INTO features (candidate_id, keys_json, values_json) VALUES (1, '[\"a\",\"b\"]', '[1.0]');",
        [],
    )
    .unwrap();
    let store = SqliteAnnotationStore::<Feature>::try_new(&conn).unwrap();

    let err = store.get(1).unwrap_err();
    assert!(matches!(err, StoreError::InvalidData(_)));
}

#[test]
fn rows_for_filters_by_class_and_split() {
    let conn = setup();
    insert_candidate(&conn, 1, "PartTemp", 0);
    insert_candidate(&conn, 2, "PartTemp", 1);
    insert_candidate(&conn, 3, "PartVolt", 0);
    let store = SqliteAnnotationStore::<Feature>::try_new(&conn).unwrap();
    for id in 1..=3 {
        store
            .upsert(&feature_row(id, &[("a", id as f64)]), WriteMode::Replace)
            .unwrap();
    }

    let rows = store.rows_for("PartTemp", 0).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].candidate_id(), 1);
}

#[test]
fn clear_by_split_keeps_other_splits_and_keys() {
    let conn = setup();
    insert_candidate(&conn, 1, "PartTemp", 0);
    insert_candidate(&conn, 2, "PartTemp", 1);
    insert_candidate(&conn, 3, "PartVolt", 0);
    let registry = SqliteKeyRegistry::<Feature>::try_new(&conn).unwrap();
    let store = SqliteAnnotationStore::<Feature>::try_new(&conn).unwrap();
    registry.get_or_create("a", 0).unwrap();
    for id in 1..=3 {
        store
            .upsert(&feature_row(id, &[("a", 1.0)]), WriteMode::Replace)
            .unwrap();
    }

    let summary = store.clear(0, &["PartTemp".to_string()], false).unwrap();
    assert_eq!(summary.rows_deleted, 1);
    assert_eq!(summary.keys_deleted, 0);
    assert!(store.get(1).unwrap().is_none());
    assert!(store.get(2).unwrap().is_some());
    assert!(store.get(3).unwrap().is_some());

    let summary = store.clear(0, &[], false).unwrap();
    assert_eq!(summary.rows_deleted, 1);
    assert!(store.get(3).unwrap().is_none());
    assert_eq!(registry.count().unwrap(), 1);
}

#[test]
fn clear_with_replace_key_set_wipes_every_split_and_the_registry() {
    let conn = setup();
    insert_candidate(&conn, 1, "PartTemp", 0);
    insert_candidate(&conn, 2, "PartTemp", 1);
    let registry = SqliteKeyRegistry::<Feature>::try_new(&conn).unwrap();
    let store = SqliteAnnotationStore::<Feature>::try_new(&conn).unwrap();
    registry.get_or_create("a", 0).unwrap();
    registry.get_or_create("b", 0).unwrap();
    store
        .upsert(&feature_row(1, &[("a", 1.0)]), WriteMode::Replace)
        .unwrap();
    store
        .upsert(&feature_row(2, &[("b", 1.0)]), WriteMode::Replace)
        .unwrap();

    let summary = store.clear(0, &[], true).unwrap();

    assert_eq!(summary.rows_deleted, 2);
    assert_eq!(summary.keys_deleted, 2);
    assert_eq!(store.count().unwrap(), 0);
    assert_eq!(registry.count().unwrap(), 0);
}

#[test]
fn clear_all_only_touches_one_kind() {
    let conn = setup();
    insert_candidate(&conn, 1, "PartTemp", 0);
    let features = SqliteAnnotationStore::<Feature>::try_new(&conn).unwrap();
    let gold = SqliteAnnotationStore::<GoldLabel>::try_new(&conn).unwrap();
    features
        .upsert(&feature_row(1, &[("a", 1.0)]), WriteMode::Replace)
        .unwrap();
    gold.upsert(
        &AnnotationRow::sparse::<GoldLabel>(1, vec![("gold".to_string(), 1)]),
        WriteMode::Replace,
    )
    .unwrap();

    assert_eq!(features.clear_all().unwrap(), 1);
    assert_eq!(features.count().unwrap(), 0);
    assert_eq!(gold.count().unwrap(), 1);
}

#[test]
fn deleting_a_candidate_cascades_to_its_annotations() {
    let conn = setup();
    insert_candidate(&conn, 1, "PartTemp", 0);
    let store = SqliteAnnotationStore::<Feature>::try_new(&conn).unwrap();
    store
        .upsert(&feature_row(1, &[("a", 1.0)]), WriteMode::Replace)
        .unwrap();

    conn.execute("DELETE FROM candidates WHERE id = 1;", [])
        .unwrap();

    assert_eq!(store.count().unwrap(), 0);
}

#[test]
fn store_requires_a_migrated_connection() {
    let conn = Connection::open_in_memory().unwrap();
    assert!(SqliteAnnotationStore::<Feature>::try_new(&conn).is_err());
}

#[test]
fn feature_values_read_back_bit_for_bit() {
    let conn = setup();
    insert_candidate(&conn, 1, "PartTemp", 0);
    let store = SqliteAnnotationStore::<Feature>::try_new(&conn).unwrap();
    let values = [
        985.6906946328695,
        212.91890726713459,
        479.60756426982596,
        f64::MIN_POSITIVE,
        -1.0e-300,
        0.1 + 0.2,
    ];
    let pairs: Vec<(String, f64)> = values
        .iter()
        .enumerate()
        .map(|(index, value)| (format!("k{index}"), *value))
        .collect();
    let row = AnnotationRow::sparse::<Feature>(1, pairs);

    store.upsert(&row, WriteMode::Replace).unwrap();

    let stored = store.get(1).unwrap().unwrap();
    let stored_bits: Vec<u64> = stored.values().iter().map(|value| value.to_bits()).collect();
    let emitted_bits: Vec<u64> = values.iter().map(|value| value.to_bits()).collect();
    assert_eq!(stored_bits, emitted_bits);
    assert_eq!(
        store.upsert(&row, WriteMode::AppendIfAbsent).unwrap(),
        UpsertOutcome::Unchanged
    );
}

#[test]
fn gold_label_rows_hold_at_most_one_pair() {
    let conn = setup();
    insert_candidate(&conn, 1, "PartTemp", 0);
    insert_candidate(&conn, 2, "PartTemp", 0);
    let gold = SqliteAnnotationStore::<GoldLabel>::try_new(&conn).unwrap();

    let single = AnnotationRow::sparse::<GoldLabel>(1, vec![("alice".to_string(), 1)]);
    assert_eq!(
        gold.upsert(&single, WriteMode::Replace).unwrap(),
        UpsertOutcome::Inserted
    );

    let double = AnnotationRow::sparse::<GoldLabel>(
        2,
        vec![("alice".to_string(), 1), ("bob".to_string(), -1)],
    );
    let err = gold.upsert(&double, WriteMode::Replace).unwrap_err();
    assert!(matches!(err, StoreError::InvalidData(_)));
    assert!(gold.get(2).unwrap().is_none());

    conn.execute(
        "INSERT INTO gold_labels (candidate_id, keys_json, values_json) VALUES (2, '[\"a\",\"b\"]', '[1,1]');",
        [],
    )
    .unwrap();
    assert!(matches!(gold.get(2).unwrap_err(), StoreError::InvalidData(_)));
}
