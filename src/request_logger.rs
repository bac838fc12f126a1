use rocket::fairing::{Fairing, Info, Kind};
use rocket::{Data, Request, Response};
use std::time::Instant;

/// Fairing to log one line per HTTP request with timing and body size
pub struct RequestLogger;

#[rocket::async_trait]
impl Fairing for RequestLogger {
    fn info(&self) -> Info {
        Info {
            name: "Request Logger",
            kind: Kind::Request | Kind::Response,
        }
    }

    async fn on_request(&self, request: &mut Request<'_>, _: &mut Data<'_>) {
        request.local_cache(Instant::now);
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let elapsed = request.local_cache(Instant::now).elapsed();
        let status = response.status();
        let millis = elapsed.as_secs_f64() * 1000.0;

        // declared body size, if any
        let length = request
            .headers()
            .get_one("Content-Length")
            .map(|len| format!(" [{len} bytes]"))
            .unwrap_or_default();

        if status.code >= 500 {
            log::warn!("{} {}{} -> {} ({:.2}ms)", request.method(), request.uri(), length, status.code, millis);
        } else {
            log::info!("{} {}{} -> {} ({:.2}ms)", request.method(), request.uri(), length, status.code, millis);
        }
    }
}
