use std::sync::Arc;

use fleet_import::config::ImportConfig;
use fleet_import::import::MappingRegistry;
use fleet_import::routes::ImportContext;
use fleet_import::routes::health::HealthResponse;
use fleet_import::store::MemoryStore;
use fleet_import::test_support::TestRocketBuilder;
use rocket::http::Status;

fn context() -> ImportContext {
    ImportContext::new(
        Arc::new(MemoryStore::new()),
        Arc::new(MappingRegistry::builtin()),
        ImportConfig::default(),
    )
}

#[test]
fn health_reports_the_store() {
    let client = TestRocketBuilder::new()
        .mount_api_routes(rocket::routes![fleet_import::routes::health::health_check])
        .manage_context(context())
        .blocking_client();

    let response = client.get("/api/v1/health").dispatch();
    assert_eq!(response.status(), Status::Ok);

    let body: HealthResponse = response.into_json().expect("valid health response");
    assert_eq!(body.status, "ok");
    assert_eq!(body.store, "memory");
    assert_eq!(body.active_uploads, 0);
}

#[test]
fn openapi_document_lists_the_import_routes() {
    let client = TestRocketBuilder::new()
        .mount_api_routes(fleet_import::api_routes())
        .manage_context(context())
        .blocking_client();

    let response = client.get("/api/v1/openapi.json").dispatch();
    assert_eq!(response.status(), Status::Ok);

    let document = response.into_string().expect("openapi body");
    assert!(document.contains("/uploads/{id}/import"));
    assert!(document.contains("/mappings/order"));
}
