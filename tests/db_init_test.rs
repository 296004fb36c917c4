mod helpers;

use mido::db;

#[test]
fn fresh_database_has_index_tables() {
    let conn = helpers::test_db();

    let tables: Vec<String> = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert!(tables.contains(&"index_entries".to_string()), "index_entries table missing");
    assert!(tables.contains(&"schema_meta".to_string()), "schema_meta table missing");

    let indexes: Vec<String> = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%' ORDER BY name")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert!(indexes.contains(&"idx_index_entries_type".to_string()));
    assert!(indexes.contains(&"idx_index_entries_importance".to_string()));
    assert!(indexes.contains(&"idx_index_entries_recency".to_string()));
}

#[test]
fn cosine_distance_is_available() {
    let conn = helpers::test_db();
    let a: Vec<f32> = vec![1.0, 0.0, 0.0];
    let b: Vec<f32> = vec![0.0, 1.0, 0.0];
    let bytes = |v: &[f32]| v.iter().flat_map(|x| x.to_le_bytes()).collect::<Vec<u8>>();

    let same: f64 = conn
        .query_row(
            "SELECT vec_distance_cosine(?1, ?2)",
            rusqlite::params![bytes(&a), bytes(&a)],
            |r| r.get(0),
        )
        .unwrap();
    assert!(same.abs() < 1e-6);

    let orthogonal: f64 = conn
        .query_row(
            "SELECT vec_distance_cosine(?1, ?2)",
            rusqlite::params![bytes(&a), bytes(&b)],
            |r| r.get(0),
        )
        .unwrap();
    assert!((orthogonal - 1.0).abs() < 1e-6);
}

#[test]
fn importance_outside_unit_range_is_rejected() {
    let conn = helpers::test_db();
    let result = conn.execute(
        "INSERT INTO index_entries (id, type, importance, created_at, embedding) VALUES (1, 'semantic', 1.5, 0, x'00')",
        [],
    );
    assert!(result.is_err());
}

#[test]
fn health_report_counts_rows() {
    let dir = tempfile::TempDir::new().unwrap();
    let conn = db::open_database(dir.path().join("index.db")).unwrap();
    conn.execute(
        "INSERT INTO index_entries (id, type, importance, created_at, embedding) VALUES (1, 'semantic', 0.5, 0, x'0000803f')",
        [],
    )
    .unwrap();

    let report = db::check_database_health(&conn).unwrap();
    assert_eq!(report.indexed_count, 1);
    assert!(report.integrity_ok);
    assert!(report.embedding_model.is_none());
}
