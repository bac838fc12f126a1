use std::sync::Arc;

use fleet_import::import::progress::{ImportStatus, TABLE_ERROR_SENTINEL};
use fleet_import::import::{BulkImporter, EmbeddedDatabase, ImportJob, MappingRegistry, TableStatus};
use fleet_import::store::{MemoryStore, TargetRow};
use fleet_import::test_support::FleetFixture;
use serde_json::{Value, json};

fn importer(store: &Arc<MemoryStore>) -> BulkImporter {
    BulkImporter::new(store.clone(), Arc::new(MappingRegistry::builtin()))
}

fn load(fixture: FleetFixture) -> Arc<EmbeddedDatabase> {
    Arc::new(EmbeddedDatabase::from_bytes("fleet.db", &fixture.build()).expect("fixture loads"))
}

fn tables(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

fn find<'a>(rows: &'a [TargetRow], column: &str, value: Value) -> &'a TargetRow {
    rows.iter()
        .find(|row| row.get(column) == Some(&value))
        .unwrap_or_else(|| panic!("no row with {column} = {value}"))
}

fn fleet_of(cars: i64) -> FleetFixture {
    (1..=cars).fold(FleetFixture::new(), |fixture, id| {
        fixture.car(id, "Toyota", "Corolla", &format!("PLT-{id:03}"))
    })
}

#[tokio::test]
async fn full_import_links_every_reference() {
    let source = load(
        FleetFixture::new()
            .car(1, "Toyota", "Corolla", "ABC-123")
            .car(2, "Honda", "Civic", "XYZ-789")
            .renter(1, "Jane Q Doe", None)
            .renter(2, "Cher", Some("555-0100"))
            .rental(1, 1, "  jane q   DOE ")
            .rental(2, 2, "Walk In")
            .payment(1, 1, 135.0)
            .expense(1, 2, "Fuel", 60.5)
            .insurance(1, 1, None, "2025-06-30")
            .registration(1, 2, None)
            .maintenance(1, 1, "Oil change")
            .fine(1, 1, Some(1), 1)
            .tracker(1, Some(1), "TRK-1"),
    );
    let store = Arc::new(MemoryStore::new());
    let job = ImportJob::new();

    let selected: Vec<String> = MappingRegistry::builtin()
        .source_tables()
        .rev()
        .map(str::to_string)
        .collect();
    let result = importer(&store).run(source, &selected, &job).await;

    assert!(result.success, "{}", result.message);
    assert!(!result.best_effort_order);
    assert_eq!(result.imported(), 13);

    let vehicles = store.rows("vehicles");
    assert_eq!(vehicles.len(), 2);
    let corolla = find(&vehicles, "license_plate", json!("ABC-123"));
    let civic = find(&vehicles, "license_plate", json!("XYZ-789"));
    assert_eq!(corolla["status"], json!("available"));
    assert_eq!(corolla["current_mileage"], json!(12000));
    assert_eq!(corolla["tracker_id"], json!("TRK-1"));
    assert_eq!(corolla["tracker_provider"], json!("TrackCo"));
    assert!(civic.get("tracker_id").is_none());

    let customers = store.rows("customers");
    let jane = find(&customers, "first_name", json!("Jane"));
    assert_eq!(jane["last_name"], json!("Q Doe"));
    assert_eq!(jane["phone"], json!("000-000-0000"));
    let cher = find(&customers, "first_name", json!("Cher"));
    assert_eq!(cher["last_name"], json!("Unknown"));

    let sessions = store.rows("rental_sessions");
    let first = find(&sessions, "vehicle_id", corolla["id"].clone());
    assert_eq!(first["customer_id"], jane["id"]);
    let walk_in = find(&sessions, "vehicle_id", civic["id"].clone());
    assert_eq!(walk_in["customer_id"], Value::Null);
    assert_eq!(walk_in["customer_name"], json!("Walk In"));

    let payments = store.rows("payments");
    assert_eq!(payments[0]["rental_session_id"], first["id"]);
    assert_eq!(payments[0]["paid_at"], json!("2024-05-04"));

    assert_eq!(store.rows("expenses")[0]["vehicle_id"], civic["id"]);
    assert_eq!(store.rows("insurance_policies")[0]["start_date"], json!("2024-06-30"));
    assert_eq!(store.rows("registrations")[0]["registration_number"], json!("PENDING"));

    let fine = &store.rows("traffic_fines")[0];
    assert_eq!(fine["paid"], json!(true));
    assert_eq!(fine["rental_session_id"], first["id"]);

    let state = job.snapshot().await;
    assert_eq!(state.status, ImportStatus::Completed);
    assert_eq!(state.progress.total_tables, 10);
    assert_eq!(state.progress.rows_completed, state.progress.rows_total);
    assert_eq!(state.progress.completed_tables.len(), 10);
    assert!(state.result.is_some());
}

#[tokio::test]
async fn rows_are_sent_in_batches_of_fifty() {
    let store = Arc::new(MemoryStore::new());
    let result = importer(&store)
        .run(load(fleet_of(120)), &tables(&["cars"]), &ImportJob::new())
        .await;

    assert_eq!(store.insert_calls("vehicles"), vec![50, 50, 20]);
    let detail = result.detail("cars").unwrap();
    assert_eq!((detail.imported, detail.failed), (120, 0));
    assert_eq!(detail.status, TableStatus::Success);
}

#[tokio::test]
async fn a_failed_batch_only_loses_its_own_rows() {
    let store = Arc::new(MemoryStore::new());
    store.fail_insert_calls("vehicles", &[2]);

    let source = load(fleet_of(120).rental(1, 10, "A B").rental(2, 60, "C D"));
    let result = importer(&store)
        .run(source, &tables(&["rentals", "cars"]), &ImportJob::new())
        .await;

    let cars = result.detail("cars").unwrap();
    assert_eq!((cars.imported, cars.failed), (70, 50));
    assert_eq!(cars.status, TableStatus::Partial);

    // car 60 was in the lost batch, so its rental cannot resolve a vehicle
    let rentals = result.detail("rentals").unwrap();
    assert_eq!((rentals.imported, rentals.failed), (1, 1));
    assert!(result.success, "partial tables do not fail the run");
}

#[tokio::test]
async fn a_table_that_fails_entirely_fails_the_run() {
    let store = Arc::new(MemoryStore::new());
    store.fail_table("expenses");

    let source = load(fleet_of(2).expense(1, 1, "fuel", 10.0).expense(2, 2, "tolls", 4.0));
    let result = importer(&store)
        .run(source, &tables(&["cars", "expenses"]), &ImportJob::new())
        .await;

    assert!(!result.success);
    assert_eq!(result.detail("cars").unwrap().status, TableStatus::Success);
    let expenses = result.detail("expenses").unwrap();
    assert_eq!((expenses.imported, expenses.failed), (0, 2));
    assert_eq!(expenses.status, TableStatus::Failed);
    assert!(result.message.contains("failed entirely: expenses"), "{}", result.message);
}

#[tokio::test]
async fn identifiers_follow_tokens_not_response_order() {
    let store = Arc::new(MemoryStore::new());
    store.reverse_responses(true);

    let source = load(fleet_of(3).rental(1, 1, "A B").rental(2, 2, "C D").rental(3, 3, "E F"));
    let result = importer(&store)
        .run(source, &tables(&["cars", "rentals"]), &ImportJob::new())
        .await;
    assert!(result.success);

    let vehicles = store.rows("vehicles");
    let sessions = store.rows("rental_sessions");
    for (plate, customer) in [("PLT-001", "A B"), ("PLT-002", "C D"), ("PLT-003", "E F")] {
        let vehicle = find(&vehicles, "license_plate", json!(plate));
        let session = find(&sessions, "customer_name", json!(customer));
        assert_eq!(session["vehicle_id"], vehicle["id"], "{customer} should rent {plate}");
    }
}

#[tokio::test]
async fn unmatched_references_are_rejected_or_nulled() {
    let store = Arc::new(MemoryStore::new());
    let source = load(
        fleet_of(1)
            .expense(1, 1, "fuel", 10.0)
            .expense(2, 99, "fuel", 12.0)
            .tracker(1, None, "TRK-LOST")
            .tracker(2, Some(1), "TRK-1"),
    );
    let result = importer(&store)
        .run(source, &tables(&["tracker", "expenses", "cars"]), &ImportJob::new())
        .await;

    let expenses = result.detail("expenses").unwrap();
    assert_eq!((expenses.imported, expenses.failed), (1, 1));

    let tracker = result.detail("tracker").unwrap();
    assert_eq!((tracker.imported, tracker.failed), (1, 1));
    assert_eq!(store.rows("vehicles")[0]["tracker_id"], json!("TRK-1"));
}

#[tokio::test]
async fn unmapped_tables_are_reported_with_the_error_sentinel() {
    let store = Arc::new(MemoryStore::new());
    let source = load(
        fleet_of(1).statement("CREATE TABLE notes (id INTEGER, body TEXT); INSERT INTO notes VALUES (1, 'hi');"),
    );
    let job = ImportJob::new();
    let result = importer(&store)
        .run(source, &tables(&["cars", "notes"]), &job)
        .await;

    let notes = result.detail("notes").unwrap();
    assert_eq!(notes.failed, TABLE_ERROR_SENTINEL);
    assert_eq!(notes.status, TableStatus::Failed);
    assert!(notes.error.is_some());
    assert!(!result.success);
    assert_eq!(result.detail("cars").unwrap().imported, 1);

    let progress = job.snapshot().await.progress;
    assert_eq!(progress.rows_total, 2);
    assert_eq!(progress.rows_completed, progress.rows_total);
    assert_eq!(progress.failed_tables.len(), 1);
}

#[tokio::test]
async fn empty_tables_have_no_data() {
    let store = Arc::new(MemoryStore::new());
    let result = importer(&store)
        .run(load(fleet_of(1)), &tables(&["cars", "maintenance"]), &ImportJob::new())
        .await;

    assert!(result.success);
    assert_eq!(result.detail("maintenance").unwrap().status, TableStatus::NoData);
    assert!(store.insert_calls("maintenance_tickets").is_empty());
}

#[tokio::test]
async fn cancellation_before_start_imports_nothing() {
    let store = Arc::new(MemoryStore::new());
    let job = ImportJob::new();
    job.cancel().await;

    let result = importer(&store)
        .run(load(fleet_of(5)), &tables(&["cars"]), &job)
        .await;

    assert!(result.cancelled);
    assert!(!result.success);
    assert!(result.details.is_empty());
    assert!(store.rows("vehicles").is_empty());
    assert_eq!(job.snapshot().await.status, ImportStatus::Cancelled);
}

#[tokio::test]
async fn smaller_batches_are_honoured() {
    let store = Arc::new(MemoryStore::new());
    let result = importer(&store)
        .with_batch_size(4)
        .run(load(fleet_of(10)), &tables(&["cars"]), &ImportJob::new())
        .await;

    assert!(result.success);
    assert_eq!(store.insert_calls("vehicles"), vec![4, 4, 2]);
}
