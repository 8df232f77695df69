use annotator_core::db::open_db_in_memory;
use annotator_core::{
    AnnotationRow, AnnotationStore, Feature, KeyRegistry, MatrixHandle, MatrixLoader,
    SqliteAnnotationStore, SqliteKeyRegistry, WriteMode,
};
use rusqlite::{params, Connection};

fn setup() -> Connection {
    let conn = open_db_in_memory().unwrap();
    for (id, class_name) in [(1, "PartTemp"), (2, "PartTemp"), (3, "PartTemp"), (4, "PartVolt")] {
        conn.execute(
            "INSERT INTO candidates (id, class_name, split) VALUES (?1, ?2, 0);",
            params![id, class_name],
        )
        .unwrap();
    }
    conn
}

fn write(conn: &Connection, candidate_id: i64, pairs: &[(&str, f64)]) {
    let registry = SqliteKeyRegistry::<Feature>::try_new(conn).unwrap();
    for (name, _) in pairs {
        registry.get_or_create(name, 0).unwrap();
    }
    let row = AnnotationRow::sparse::<Feature>(
        candidate_id,
        pairs.iter().map(|(name, value)| (name.to_string(), *value)),
    );
    SqliteAnnotationStore::<Feature>::try_new(conn)
        .unwrap()
        .upsert(&row, WriteMode::Replace)
        .unwrap();
}

#[test]
fn unannotated_candidates_are_empty_rows() {
    let conn = setup();
    write(&conn, 2, &[("a", 5.0)]);

    let matrix = MatrixLoader::<Feature>::new(&conn)
        .load("PartTemp", 0, 0)
        .unwrap();

    assert_eq!(matrix.shape(), (3, 1));
    assert_eq!(matrix.candidate_ids(), &[1, 2, 3]);
    assert!(matrix.row(0).is_empty());
    assert_eq!(matrix.get(matrix.row_index(2).unwrap(), 0), 5.0);
    assert_eq!(matrix.nnz(), 1);
}

#[test]
fn columns_follow_key_creation_order() {
    let conn = setup();
    write(&conn, 1, &[("zeta", 1.0)]);
    write(&conn, 2, &[("alpha", 2.0), ("zeta", 3.0)]);

    let matrix = MatrixLoader::<Feature>::new(&conn)
        .load("PartTemp", 0, 0)
        .unwrap();

    let names: Vec<&str> = matrix.keys().iter().map(|key| key.name.as_str()).collect();
    assert_eq!(names, vec!["zeta", "alpha"]);
    assert_eq!(
        matrix.to_dense(),
        vec![vec![1.0, 0.0], vec![3.0, 2.0], vec![0.0, 0.0]]
    );
}

#[test]
fn keys_missing_from_the_registry_are_skipped() {
    let conn = setup();
    write(&conn, 1, &[("a", 1.0)]);
    conn.execute(
        "INSERT INTO features (candidate_id, keys_json, values_json) VALUES (3, '[\"ghost\"]', '[7.0]');",
        [],
    )
    .unwrap();

    let matrix = MatrixLoader::<Feature>::new(&conn)
        .load("PartTemp", 0, 0)
        .unwrap();

    assert_eq!(matrix.shape(), (3, 1));
    assert_eq!(matrix.column_index("ghost"), None);
    assert!(matrix.row(2).is_empty());
}

#[test]
fn handle_reloads_current_state() {
    let conn = setup();
    let handle = MatrixHandle::<Feature>::new("PartTemp", 0, 0);
    assert_eq!(handle.class_name(), "PartTemp");
    assert_eq!(handle.load(&conn).unwrap().nnz(), 0);

    write(&conn, 1, &[("a", 1.0)]);
    let reloaded = handle.clone().load(&conn).unwrap();

    assert_eq!(reloaded.nnz(), 1);
    assert_eq!(reloaded.get(0, 0), 1.0);
}
