use axum::{
    Json, Router,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use backon::ExponentialBuilder;
use banking_settings::SettingsError;
use banking_settings::admin::{AdminClient, AdminCredentials};
use banking_settings::config::AdminConfig;
use banking_settings::error::IsRetryable;
use serde_json::json;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;
use tokio::net::TcpListener;

const SUBSCRIPTION_PATH: &str = "/api/method/banking_admin.api.get_subscription";

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind mock admin app");
    let addr = listener.local_addr().expect("no local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

fn client() -> AdminClient {
    let cfg = AdminConfig {
        requests_per_minute: 600,
        ..AdminConfig::default()
    };
    AdminClient::new(&cfg).expect("client").with_retry_policy(
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5))
            .with_max_times(2),
    )
}

fn creds(endpoint: String) -> AdminCredentials {
    AdminCredentials {
        endpoint,
        customer_id: "C-1".into(),
        api_token: "tok".into(),
    }
}

#[tokio::test]
async fn fetches_subscription_with_token_header() {
    let app = Router::new().route(
        SUBSCRIPTION_PATH,
        get(|headers: HeaderMap| async move {
            let auth = headers
                .get("alyf-banking-authorization")
                .and_then(|v| v.to_str().ok());
            if auth != Some("Token C-1:tok") {
                return (StatusCode::UNAUTHORIZED, Json(json!({"message": "no"}))).into_response();
            }
            Json(json!({"message": {
                "plan": "Business",
                "status": "Active",
                "valid_till": "2027-06-30",
                "fintech_license": {"key": "LIC", "licensee_name": "ACME"}
            }}))
            .into_response()
        }),
    );
    let base = serve(app).await;

    let sub = client()
        .fetch_subscription(&creds(format!("{base}/")))
        .await
        .expect("subscription");
    assert_eq!(sub.plan.as_deref(), Some("Business"));
    assert_eq!(sub.fintech_license.expect("license").key, "LIC");

    let mut wrong = creds(base);
    wrong.api_token = "other".into();
    let err = client().fetch_subscription(&wrong).await.unwrap_err();
    match err {
        SettingsError::Banking(e) => {
            assert_eq!(e.status, Some(401));
            assert_eq!(e.message, "Authentication error due to invalid credentials.");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn server_errors_are_retried() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = Router::new().route(
        SUBSCRIPTION_PATH,
        get(move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    return (StatusCode::BAD_GATEWAY, "<html>bad gateway</html>").into_response();
                }
                Json(json!({"message": {"plan": "Starter"}})).into_response()
            }
        }),
    );
    let base = serve(app).await;

    let sub = client().fetch_subscription(&creds(base)).await.expect("retried");
    assert_eq!(sub.plan.as_deref(), Some("Starter"));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = Router::new().route(
        SUBSCRIPTION_PATH,
        get(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let body = json!({"message": {"error": {"errors": [
                    {"location": "customer", "message": "Unknown customer"}
                ]}}});
                (StatusCode::BAD_REQUEST, Json(body)).into_response()
            }
        }),
    );
    let base = serve(app).await;

    let err = client().fetch_subscription(&creds(base)).await.unwrap_err();
    assert!(!err.is_retryable());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(
        err.to_string(),
        "Banking error: Banking Action has failed due to the following error(s):\n- customer - Unknown customer"
    );
}

#[tokio::test]
async fn empty_message_is_a_banking_error() {
    let app = Router::new().route(
        SUBSCRIPTION_PATH,
        get(|| async { Json(json!({"message": null})) }),
    );
    let base = serve(app).await;

    let err = client().fetch_subscription(&creds(base)).await.unwrap_err();
    assert!(matches!(err, SettingsError::Banking(_)));
}

#[tokio::test]
async fn persistent_server_errors_give_up() {
    let app: Router = Router::new().route(
        SUBSCRIPTION_PATH,
        get(|| async { Response::builder().status(503).body(axum::body::Body::empty()).unwrap() }),
    );
    let base = serve(app).await;

    let err = client().fetch_subscription(&creds(base)).await.unwrap_err();
    match err {
        SettingsError::Banking(e) => assert!(e.is_server_error()),
        other => panic!("unexpected error: {other}"),
    }
}
