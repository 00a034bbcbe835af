//! The state-transfer endpoint and the parity demo page.

use axum::extract::{Extension, Query, State};
use axum::response::{Html, IntoResponse, Redirect, Response};
use http::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info};

use crate::app::AppState;
use crate::manager::SessionHandle;

/// Session key carrying the transferred value.
pub const VALUE_KEY: &str = "value";

/// Query parameters for [`transfer`].
#[derive(Debug, Deserialize)]
pub struct TransferParams {
    /// Value to store; absent or empty clears the key instead.
    pub value: Option<String>,
}

/// Writes (or clears) the transferred value and redirects to the
/// application root. The session mutation rides the redirect response's
/// own `Set-Cookie`.
pub async fn transfer(
    State(state): State<AppState>,
    Extension(session): Extension<SessionHandle>,
    Query(params): Query<TransferParams>,
) -> Response {
    let result = match params.value.as_deref() {
        None | Some("") => {
            info!(session_id = %session.id(), "clearing transferred value");
            session.remove(VALUE_KEY).await
        },
        Some(value) => {
            info!(session_id = %session.id(), "storing transferred value");
            session.set(VALUE_KEY, Value::String(value.to_string())).await
        },
    };

    match result {
        Ok(()) => Redirect::to(&state.root).into_response(),
        Err(err) => {
            error!(error = %err, "session store unavailable on transfer");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        },
    }
}

/// Renders the transferred value through the runtime bridge.
///
/// The page binds the request's session to a bridge connection and reads
/// through that handle, exercising the same path an interactive runtime
/// would. The session itself was already resolved once by the layer; the
/// bridge adopts that handle rather than resolving the headers again.
pub async fn index(
    State(state): State<AppState>,
    Extension(session): Extension<SessionHandle>,
) -> Response {
    let connection = state.bridge.attach(session);

    match connection.handle.get(VALUE_KEY).await {
        Ok(value) => {
            let rendered = match value {
                Some(Value::String(s)) => escape_html(&s),
                Some(other) => escape_html(&other.to_string()),
                None => "(absent)".to_string(),
            };
            Html(format!(
                "<!doctype html><html><body><p>Transferred value: \
                 <strong id=\"value\">{rendered}</strong></p></body></html>"
            ))
            .into_response()
        },
        Err(err) => {
            error!(error = %err, "session store unavailable on read");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        },
    }
}

/// Escapes `&`, `<`, `>`, `"`, and `'` for safe interpolation into HTML
/// text and attribute positions. The transferred value is user input and
/// must never reach the page verbatim.
fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_html_neutralizes_markup() {
        assert_eq!(
            escape_html("<script>alert('x')</script>"),
            "&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt;"
        );
        assert_eq!(escape_html(r#"a & "b""#), "a &amp; &quot;b&quot;");
        assert_eq!(escape_html("plain"), "plain");
    }
}
