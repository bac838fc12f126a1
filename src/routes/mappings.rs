//! Read-only views of the mapping registry.

use crate::import::mapping::TableMapping;
use crate::import::resolver::{ImportOrder, resolve_import_order};
use crate::models::DataResponse;
use crate::routes::ImportContext;
use crate::routes::helpers::split_list;
use rocket::State;
use rocket::serde::json::Json;
use rocket_okapi::openapi;

/// List every known source table mapping in registry order.
#[openapi(tag = "Mappings")]
#[get("/mappings")]
pub fn list_mappings(context: &State<ImportContext>) -> Json<DataResponse<Vec<TableMapping>>> {
    Json(DataResponse {
        data: context.registry.mappings().to_vec(),
    })
}

/// Resolve the import order for a comma-separated table list.
///
/// Without `tables`, every mapped table is ordered.
#[openapi(tag = "Mappings")]
#[get("/mappings/order?<tables>")]
pub fn import_order(tables: Option<String>, context: &State<ImportContext>) -> Json<ImportOrder> {
    let selected = match tables {
        Some(list) => split_list(&list),
        None => context.registry.source_tables().map(str::to_string).collect(),
    };
    Json(resolve_import_order(&context.registry, &selected))
}
