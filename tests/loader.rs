use fleet_import::import::schema::ColumnKind;
use fleet_import::import::{EmbeddedDatabase, LoaderError};
use fleet_import::test_support::{FleetFixture, empty_database_bytes};
use serde_json::json;
use std::io::Write;

#[test]
fn rejects_files_without_a_sqlite_extension() {
    let bytes = FleetFixture::new().build();
    let err = EmbeddedDatabase::from_bytes("fleet.csv", &bytes).unwrap_err();
    assert!(matches!(err, LoaderError::UnsupportedExtension { .. }));
}

#[test]
fn rejects_payloads_that_are_not_sqlite() {
    let err = EmbeddedDatabase::from_bytes("fleet.db", b"id,make\n1,Toyota\n").unwrap_err();
    assert!(matches!(err, LoaderError::Corrupt { .. }));
}

#[test]
fn rejects_databases_without_tables() {
    let err = EmbeddedDatabase::from_bytes("empty.sqlite", &empty_database_bytes()).unwrap_err();
    assert!(matches!(err, LoaderError::NoTables { .. }));
}

#[test]
fn discovers_the_legacy_schema() {
    let bytes = FleetFixture::new()
        .car(1, "Toyota", "Corolla", "ABC-123")
        .statement("CREATE TABLE notes (id INTEGER, body TEXT, archived BOOLEAN)")
        .build();
    let db = EmbeddedDatabase::from_bytes("Fleet.SQLite3", &bytes).unwrap();

    let names: Vec<&str> = db.tables().iter().map(|table| table.name.as_str()).collect();
    assert_eq!(names.len(), 11);
    assert!(names.contains(&"notes"));
    assert!(names.contains(&"tracker"));

    let notes = db.table("notes").unwrap();
    assert_eq!(notes.row_count, 0);
    let archived = notes.columns.iter().find(|c| c.name == "archived").unwrap();
    assert_eq!(archived.kind, ColumnKind::Boolean);

    let cars = db.table("cars").unwrap();
    let purchase_date = cars.columns.iter().find(|c| c.name == "purchase_date").unwrap();
    assert_eq!(purchase_date.kind, ColumnKind::Date);
    assert_eq!(db.total_rows(["cars", "notes", "missing"]), 1);
}

#[test]
fn samples_respect_the_limit() {
    let bytes = (1..=30)
        .fold(FleetFixture::new(), |fixture, id| fixture.car(id, "Kia", "Rio", &format!("K-{id}")))
        .build();
    let db = EmbeddedDatabase::from_bytes("fleet.db", &bytes).unwrap();

    let sample = db.read_sample("cars", 5).unwrap();
    assert_eq!(sample.len(), 5);
    assert_eq!(sample[0]["plate"], json!("K-1"));
    assert_eq!(sample[0]["daily_rate"], json!(45.0));
    assert_eq!(sample[0]["vin"], json!(null));

    assert_eq!(db.read_rows("cars").unwrap().len(), 30);
    assert!(matches!(db.read_rows("garage"), Err(LoaderError::UnknownTable(_))));
}

#[test]
fn opens_files_from_disk_with_a_stable_fingerprint() {
    let bytes = FleetFixture::new().renter(1, "Ada Lovelace", None).build();

    let mut file = tempfile::Builder::new().suffix(".db").tempfile().unwrap();
    file.write_all(&bytes).unwrap();
    file.flush().unwrap();

    let from_disk = EmbeddedDatabase::open(file.path()).unwrap();
    let from_memory = EmbeddedDatabase::from_bytes("copy.db", &bytes).unwrap();

    assert_eq!(from_disk.fingerprint(), from_memory.fingerprint());
    assert_eq!(from_disk.fingerprint().len(), 64);
    assert_eq!(from_disk.size_bytes(), bytes.len() as u64);
    from_disk.close().unwrap();
}
