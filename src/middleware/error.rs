use std::any::Any;
use std::error::Error as _;

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

/// Failure that aborts a request.
///
/// Rendered as a 500 whose body echoes the error and its causes. This is
/// demo behaviour; a production service would not reveal error details.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Failed(#[from] crate::error::Error),

    #[error("request handler panicked: {0}")]
    Panicked(String),
}

impl AppError {
    fn report(&self) -> String {
        let mut report = self.to_string();
        let mut source = self.source();
        while let Some(cause) = source {
            // Wrappers such as `HTTP error: {0}` already print their source.
            let cause_text = cause.to_string();
            if !report.ends_with(&cause_text) {
                report.push_str(&format!("\n    caused by: {cause_text}"));
            }
            source = cause.source();
        }
        report
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let report = self.report();
        tracing::error!(error = %report, "Request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            report,
        )
            .into_response()
    }
}

/// Panic handler for `CatchPanicLayer`: the outermost error stage.
pub(super) fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    };
    AppError::Panicked(message).into_response()
}
