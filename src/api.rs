use std::{any::Any, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{Path, Request, State, rejection::JsonRejection},
    http::{HeaderName, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::{
    LatencyUnit,
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, error, info, info_span, instrument};
use validator::{Validate, ValidationErrors};

use crate::url_service::{DeleteUrlError, PostUrlError, UrlRegistrationService};

const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Deserialize, Validate)]
pub struct PostUrlPayload {
    #[validate(required, url)]
    pub url: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub alias: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Ok,
    Error,
}

/// The `{status, error?}` shape every response shares.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            status: Status::Ok,
            error: None,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PostUrlResponse {
    #[serde(flatten)]
    pub envelope: Envelope,
    pub alias: String,
}

type ErrorResponse = (StatusCode, Json<Envelope>);

fn error_response(status: StatusCode, message: impl Into<String>) -> ErrorResponse {
    (status, Json(Envelope::error(message)))
}

fn router(url_service: Arc<dyn UrlRegistrationService>) -> Router {
    Router::new()
        .route("/url", routing::post(post_url))
        .route("/url/{alias}", routing::delete(delete_url))
        .fallback(not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .with_state(url_service)
}

/// The HTTP surface wrapped in request id, logging, panic recovery and timeout layers.
///
/// Failures produced by the layers themselves still use the [`Envelope`] shape.
pub fn app(url_service: Arc<dyn UrlRegistrationService>, request_timeout: Duration) -> Router {
    let request_id_header = HeaderName::from_static(REQUEST_ID_HEADER);

    router(url_service).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(
                request_id_header.clone(),
                MakeRequestUuid,
            ))
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(|request: &Request| {
                        let request_id = request
                            .headers()
                            .get(REQUEST_ID_HEADER)
                            .and_then(|value| value.to_str().ok())
                            .unwrap_or_default();
                        info_span!(
                            "request",
                            method = %request.method(),
                            path = %request.uri().path(),
                            request_id
                        )
                    })
                    .on_response(
                        DefaultOnResponse::new()
                            .level(Level::INFO)
                            .latency_unit(LatencyUnit::Millis),
                    ),
            )
            .layer(PropagateRequestIdLayer::new(request_id_header))
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(middleware::map_response(timeout_envelope))
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                request_timeout,
            )),
    )
}

fn panic_response(_: Box<dyn Any + Send + 'static>) -> Response {
    error!("Request handler panicked");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
}

/// [`TimeoutLayer`] answers with an empty body; give it the envelope.
async fn timeout_envelope(response: Response) -> Response {
    if response.status() == StatusCode::REQUEST_TIMEOUT {
        info!("Request timed out");
        return error_response(StatusCode::REQUEST_TIMEOUT, "request timed out").into_response();
    }
    response
}

async fn not_found() -> ErrorResponse {
    error_response(StatusCode::NOT_FOUND, "not found")
}

async fn method_not_allowed() -> ErrorResponse {
    error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
}

#[instrument(skip(url_service))]
async fn post_url(
    State(url_service): State<Arc<dyn UrlRegistrationService>>,
    payload: Result<Json<PostUrlPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<PostUrlResponse>), ErrorResponse> {
    let Json(payload) = payload.map_err(|rejection| {
        info!(?rejection, "Failed to decode request body");
        error_response(StatusCode::BAD_REQUEST, "failed to decode request")
    })?;

    if let Err(errors) = payload.validate() {
        info!(?errors, "Invalid request");
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            validation_message(&errors),
        ));
    }

    let PostUrlPayload { url, alias } = payload;
    let url = url.unwrap_or_default();

    url_service
        .save_url(&url, alias)
        .await
        .map(|saved| {
            info!(id = saved.id, alias = %saved.alias, "url saved");
            (
                StatusCode::CREATED,
                Json(PostUrlResponse {
                    envelope: Envelope::ok(),
                    alias: saved.alias,
                }),
            )
        })
        .map_err(|error: PostUrlError| match error {
            PostUrlError::InvalidUrl(_) => {
                info!(?error, %url, "User submitted an invalid url");
                error_response(StatusCode::BAD_REQUEST, "field URL must be a valid URL")
            }
            PostUrlError::InvalidAlias(_) => {
                info!(?error, "User submitted an invalid alias");
                error_response(StatusCode::BAD_REQUEST, "field Alias is not valid")
            }
            PostUrlError::AlreadyExists(conflict) => {
                info!(%conflict, %url, "url already exists");
                error_response(StatusCode::CONFLICT, "url already exists")
            }
            PostUrlError::AliasGenerationExhausted | PostUrlError::Internal(_) => {
                error!(?error, "failed to save url");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to save url")
            }
        })
}

#[instrument(skip(url_service))]
async fn delete_url(
    State(url_service): State<Arc<dyn UrlRegistrationService>>,
    Path(alias): Path<String>,
) -> Result<Json<Envelope>, ErrorResponse> {
    url_service
        .delete_url(&alias)
        .await
        .map(|()| {
            info!(%alias, "url deleted");
            Json(Envelope::ok())
        })
        .map_err(|error: DeleteUrlError| match error {
            DeleteUrlError::EmptyAlias => {
                info!("User submitted an empty alias");
                error_response(StatusCode::BAD_REQUEST, "field Alias is required field")
            }
            DeleteUrlError::NotFound => {
                info!(%alias, "url not found");
                error_response(StatusCode::NOT_FOUND, "url not found")
            }
            DeleteUrlError::Internal(_) => {
                error!(?error, "failed to delete url");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to delete url")
            }
        })
}

/// Renders validator failures as `field <Name> ...` messages joined by `", "`.
fn validation_message(errors: &ValidationErrors) -> String {
    let mut field_errors: Vec<_> = errors.field_errors().into_iter().collect();
    field_errors.sort_by(|(a, _), (b, _)| a.cmp(b));

    field_errors
        .into_iter()
        .flat_map(|(field, errors)| {
            let name = match field.as_ref() {
                "url" => "URL".to_owned(),
                "alias" => "Alias".to_owned(),
                other => other.to_owned(),
            };
            errors.iter().map(move |error| match error.code.as_ref() {
                "required" => format!("field {name} is required field"),
                "url" => format!("field {name} must be a valid URL"),
                _ => format!("field {name} is not valid"),
            })
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn payload(url: Option<&str>, alias: Option<&str>) -> PostUrlPayload {
        PostUrlPayload {
            url: url.map(str::to_owned),
            alias: alias.map(str::to_owned),
        }
    }

    #[test]
    fn test_validation_message_missing_url() {
        let errors = payload(None, None).validate().unwrap_err();
        assert_eq!(validation_message(&errors), "field URL is required field");
    }

    #[test]
    fn test_validation_message_invalid_url() {
        let errors = payload(Some("not-a-url"), None).validate().unwrap_err();
        assert_eq!(validation_message(&errors), "field URL must be a valid URL");
    }

    #[test]
    fn test_validation_message_joins_fields() {
        let errors = payload(Some("not-a-url"), Some("")).validate().unwrap_err();
        assert_eq!(
            validation_message(&errors),
            "field Alias is not valid, field URL must be a valid URL"
        );
    }

    #[test]
    fn test_valid_payload() {
        assert!(
            payload(Some("https://example.com"), Some("abc"))
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_envelope_serialization() {
        assert_eq!(
            serde_json::to_value(Envelope::ok()).unwrap(),
            serde_json::json!({ "status": "OK" })
        );
        assert_eq!(
            serde_json::to_value(Envelope::error("url not found")).unwrap(),
            serde_json::json!({ "status": "ERROR", "error": "url not found" })
        );
        assert_eq!(
            serde_json::to_value(PostUrlResponse {
                envelope: Envelope::ok(),
                alias: "abc123".to_owned(),
            })
            .unwrap(),
            serde_json::json!({ "status": "OK", "alias": "abc123" })
        );
    }
}
