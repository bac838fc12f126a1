use crate::import::loader::LoaderError;
use crate::import::session::SessionError;
use crate::store::StoreError;
use rocket::http::Status;
use rocket::response::{self, Responder};
use rocket::{Request, Response};
use rocket_okapi::OpenApiError;
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::Responses;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::response::OpenApiResponderInner;
use rocket_okapi::util::add_schema_response;
use serde::{Deserialize, Serialize};
use std::io::Cursor;

#[derive(Debug)]
pub enum ApiError {
    StoreError(StoreError),
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    PayloadTooLarge(String),
    InternalError(String),
}

/// JSON body of every error response.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let (status, error_type, message) = match self {
            ApiError::StoreError(e) => {
                log::error!("store error: {}", e);
                (Status::BadGateway, "StoreError", e.to_string())
            }
            ApiError::NotFound(msg) => {
                log::debug!("not found: {}", msg);
                (Status::NotFound, "NotFound", msg)
            }
            ApiError::BadRequest(msg) => {
                log::debug!("bad request: {}", msg);
                (Status::BadRequest, "BadRequest", msg)
            }
            ApiError::Conflict(msg) => {
                log::debug!("conflict: {}", msg);
                (Status::Conflict, "Conflict", msg)
            }
            ApiError::PayloadTooLarge(msg) => {
                log::debug!("payload too large: {}", msg);
                (Status::PayloadTooLarge, "PayloadTooLarge", msg)
            }
            ApiError::InternalError(msg) => {
                log::error!("internal error: {}", msg);
                (Status::InternalServerError, "InternalError", msg)
            }
        };

        let error_response = ErrorResponse {
            error: error_type.to_string(),
            message,
        };

        let json = serde_json::to_string(&error_response)
            .unwrap_or_else(|_| r#"{"error":"SerializationError","message":"Failed to serialize error"}"#.to_string());

        Response::build()
            .status(status)
            .header(rocket::http::ContentType::JSON)
            .sized_body(json.len(), Cursor::new(json))
            .ok()
    }
}

impl OpenApiResponderInner for ApiError {
    fn responses(generator: &mut OpenApiGenerator) -> Result<Responses, OpenApiError> {
        let mut responses = Responses::default();
        let schema = generator.json_schema::<ErrorResponse>();
        for status in [400, 404, 409, 413, 500, 502] {
            add_schema_response(&mut responses, status, "application/json", schema.clone())?;
        }
        Ok(responses)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidIdentifier(_) => ApiError::BadRequest(err.to_string()),
            _ => ApiError::StoreError(err),
        }
    }
}

impl From<LoaderError> for ApiError {
    fn from(err: LoaderError) -> Self {
        match err {
            LoaderError::UnsupportedExtension { .. }
            | LoaderError::Corrupt { .. }
            | LoaderError::NoTables { .. } => ApiError::BadRequest(err.to_string()),
            LoaderError::UnknownTable(_) => ApiError::NotFound(err.to_string()),
            LoaderError::Sqlite(_) | LoaderError::Io(_) => ApiError::InternalError(err.to_string()),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound(_) => ApiError::NotFound(err.to_string()),
            SessionError::ImportRunning(_) | SessionError::SourceReleased(_) => {
                ApiError::Conflict(err.to_string())
            }
        }
    }
}
