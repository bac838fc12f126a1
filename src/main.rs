#[macro_use]
extern crate rocket;

#[launch]
fn rocket() -> _ {
    log::info!("starting fleet import API server");
    fleet_import::rocket()
}
