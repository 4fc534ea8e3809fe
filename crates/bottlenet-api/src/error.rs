//! HTTP error mapping for the control endpoints.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use bottlenet_cluster::ClusterError;
use thiserror::Error;

/// Wrapper turning cluster failures into plain-text HTTP responses.
///
/// The control protocol knows a single failure shape: status 500 with the
/// error text as the body. Validation failures, round failures and
/// transport failures all travel that way.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ApiError(#[from] ClusterError);

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::InternalServerError()
            .content_type("text/plain; charset=utf-8")
            .body(self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_cluster_error_maps_to_500() {
        let err = ApiError::from(ClusterError::EmptyPeerAddr);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "peer addr cannot be empty");
    }
}
