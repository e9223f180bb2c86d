//! Settings endpoint. Credentials are masked.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use kiln_config::Settings;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(show_settings))
}

async fn show_settings(State(state): State<AppState>) -> Json<Settings> {
    Json(state.settings.redacted())
}

#[cfg(test)]
mod tests {
    use crate::routes::test_support::{app_with, get, send};
    use axum::http::StatusCode;
    use kiln_config::parse_settings;

    #[tokio::test]
    async fn test_secrets_are_masked() {
        let settings = parse_settings(
            r#"
            build { test "make check" }
            github { token "ghp_secret"; webhook-secret "hook" }
            "#,
        )
        .unwrap();
        let (app, _) = app_with(settings);

        let (status, body) = send(&app, get("/api/v1/settings")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["build"]["test"], "make check");
        let text = body.to_string();
        assert!(!text.contains("ghp_secret"));
        assert!(!text.contains("\"hook\""));
    }
}
