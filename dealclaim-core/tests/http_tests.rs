// tests/http_tests.rs

use std::net::{IpAddr, SocketAddr};

use axum::body::{to_bytes, Body};
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use dealclaim_core::http::router;
use dealclaim_core::test_utils::TestHarness;

const PROXY: &str = "10.0.0.1";

/// The API as deployed: every request arrives through the front proxy.
fn behind_proxy(h: &TestHarness) -> anyhow::Result<Router> {
    direct_from(h, PROXY)
}

/// The API reached straight from `peer`, with the proxy still configured.
fn direct_from(h: &TestHarness, peer: &str) -> anyhow::Result<Router> {
    let proxy: IpAddr = PROXY.parse()?;
    let peer = SocketAddr::new(peer.parse()?, 40_000);
    Ok(router(h.engine.clone(), vec![proxy]).layer(MockConnectInfo(peer)))
}

fn get_as(uri: &str, token: Option<&str>) -> anyhow::Result<Request<Body>> {
    let mut req = Request::get(uri);
    if let Some(token) = token {
        req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    Ok(req.body(Body::empty())?)
}

fn post_as(uri: &str, token: &str) -> anyhow::Result<Request<Body>> {
    Ok(Request::post(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())?)
}

async fn send(app: &Router, req: Request<Body>) -> anyhow::Result<(StatusCode, Value)> {
    let response = app.clone().oneshot(req).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 1 << 20).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, body))
}

fn post_json(uri: &str, body: Value) -> anyhow::Result<Request<Body>> {
    Ok(Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", "203.0.113.50")
        .header(header::USER_AGENT, "till/2.1")
        .body(Body::from(body.to_string()))?)
}

#[tokio::test]
async fn test_health() -> anyhow::Result<()> {
    let h = TestHarness::new()?;
    let app = behind_proxy(&h)?;

    let (status, body) = send(&app, Request::get("/health").body(Body::empty())?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn test_claim_verify_complete_over_http() -> anyhow::Result<()> {
    let h = TestHarness::new()?;
    let app = behind_proxy(&h)?;

    // 1) Claim
    let (status, ticket) = send(&app, post_json("/claims", json!({ "user_id": 100, "deal_id": 42 }))?).await?;
    assert_eq!(status, StatusCode::CREATED);
    let code = ticket["claim_code"].as_str().unwrap_or_default().to_string();
    assert_eq!(code.len(), 6);
    assert_eq!(ticket["status"], "claimed");

    // 2) Duplicate claim conflicts
    let (status, err) = send(&app, post_json("/claims", json!({ "user_id": 100, "deal_id": 42 }))?).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["error"], "duplicate_active_claim");

    // 3) Verify at the till
    let (status, verified) = send(&app, post_json("/claims/verify", json!({ "code": code }))?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verified["valid"], true);
    assert_eq!(verified["claim"]["status"], "used");
    assert_eq!(verified["customer"]["user_id"], 100);

    // 4) Second verify is refused
    let (status, err) = send(&app, post_json("/claims/verify", json!({ "code": code }))?).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["error"], "already_redeemed");

    // 5) Record the bill
    let (status, receipt) = send(
        &app,
        post_json("/claims/complete", json!({ "code": code, "bill_amount": 2_500 }))?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(receipt["success"], true);
    assert_eq!(receipt["customer_savings"], 500);

    // 6) The audit trail carries the forwarded address and agent
    let vendor = h.engine.vendor_tokens.issue(1);
    let (status, attempts) = send(&app, get_as("/deals/42/attempts?limit=10", Some(&vendor))?).await?;
    assert_eq!(status, StatusCode::OK);
    let rows = attempts.as_array().cloned().unwrap_or_default();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r["ip_address"] == "203.0.113.50"));
    assert!(rows.iter().all(|r| r["user_agent"] == "till/2.1"));
    Ok(())
}

#[tokio::test]
async fn test_deal_pin_routes() -> anyhow::Result<()> {
    let h = TestHarness::new()?;
    let app = behind_proxy(&h)?;

    let vendor = h.engine.vendor_tokens.issue(1);

    // 1) Rotating PIN display
    let (status, current) = send(&app, get_as("/deals/7/pin/current", Some(&vendor))?).await?;
    assert_eq!(status, StatusCode::OK);
    let pin = current["pin"].as_str().unwrap_or_default().to_string();
    assert!(current["next_rotation_at"].is_string());

    let (status, ok) = send(&app, post_json("/deals/7/pin/verify", json!({ "pin": pin }))?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ok["method"], "rotating");

    // 2) Issue a static PIN and use it
    let (status, issued) = send(&app, post_as("/deals/7/pin", &vendor)?).await?;
    assert_eq!(status, StatusCode::CREATED);
    let static_pin = issued["pin"].as_str().unwrap_or_default().to_string();
    let (status, ok) = send(&app, post_json("/deals/7/pin/verify", json!({ "pin": static_pin }))?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ok["method"], "hashed");

    // 3) Wrong PIN
    let (status, err) = send(&app, post_json("/deals/7/pin/verify", json!({ "pin": "NOPE00" }))?).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(err["error"], "invalid_pin");

    // 4) Unknown deal
    let (status, err) = send(&app, get_as("/deals/999/pin/current", Some(&vendor))?).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["error"], "deal_not_found");
    Ok(())
}

#[tokio::test]
async fn test_rate_limited_response_has_retry_after() -> anyhow::Result<()> {
    let h = TestHarness::new()?;
    let app = behind_proxy(&h)?;

    for _ in 0..5 {
        let (status, _) = send(&app, post_json("/deals/7/pin/verify", json!({ "pin": "WRONG1" }))?).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let response = app
        .clone()
        .oneshot(post_json("/deals/7/pin/verify", json!({ "pin": "WRONG1" }))?)
        .await?;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok());
    assert_eq!(retry_after, Some(3600));
    Ok(())
}

#[tokio::test]
async fn test_activation_route_and_bad_identity() -> anyhow::Result<()> {
    let h = TestHarness::new()?;
    let mut gated = dealclaim_core::test_utils::test_deal(50, 1, 10);
    gated.requires_activation = true;
    h.store.insert_deal(gated);
    let app = behind_proxy(&h)?;

    let (_, ticket) = send(&app, post_json("/claims", json!({ "user_id": 101, "deal_id": 50 }))?).await?;
    assert_eq!(ticket["status"], "pending");
    let claim_id = ticket["claim_id"].as_str().unwrap_or_default().to_string();

    let (status, claim) = send(
        &app,
        Request::post(format!("/claims/{claim_id}/activate")).body(Body::empty())?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(claim["status"], "claimed");

    // A proxy forwarding a garbled user id is a bad request
    let bad = Request::post("/claims/verify")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-user-id", "not-a-number")
        .body(Body::from(json!({ "code": "AAAAAA" }).to_string()))?;
    let (status, err) = send(&app, bad).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"], "bad_request");
    Ok(())
}

#[tokio::test]
async fn test_direct_clients_cannot_rotate_identity_headers() -> anyhow::Result<()> {
    let h = TestHarness::new()?;
    let app = direct_from(&h, "198.51.100.23")?;

    let guess = |i: u32| -> anyhow::Result<Request<Body>> {
        Ok(Request::post("/deals/7/pin/verify")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-user-id", (9_000 + i).to_string())
            .header("x-forwarded-for", format!("203.0.113.{i}"))
            .body(Body::from(json!({ "pin": "WRONG1" }).to_string()))?)
    };

    // 1) Five guesses, each claiming to be someone new
    for i in 0..5 {
        let (status, _) = send(&app, guess(i)?).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "guess {i}");
    }

    // 2) They all counted against the socket address
    let (status, err) = send(&app, guess(5)?).await?;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(err["error"], "rate_limited");

    let attempts = h.store.attempts();
    assert_eq!(attempts.len(), 6);
    assert!(attempts.iter().all(|a| a.ip_address == "198.51.100.23" && a.user_id.is_none()));
    Ok(())
}

#[tokio::test]
async fn test_vendor_routes_require_the_owning_vendor() -> anyhow::Result<()> {
    let h = TestHarness::new()?;
    h.store.insert_deal(dealclaim_core::test_utils::test_deal(60, 2, 10));
    let app = behind_proxy(&h)?;
    let owner = h.engine.vendor_tokens.issue(1);
    let stranger = h.engine.vendor_tokens.issue(2);

    // 1) No token, or a made-up one
    for token in [None, Some("1.bm90LWEtbWFj")] {
        let (status, err) = send(&app, get_as("/deals/42/pin/current", token)?).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(err["error"], "unauthorized");
        let (status, _) = send(&app, get_as("/deals/42/attempts", token)?).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    let (status, _) = send(&app, Request::post("/deals/42/pin").body(Body::empty())?).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // 2) Another vendor's deal
    for req in [
        get_as("/deals/42/pin/current", Some(&stranger))?,
        get_as("/deals/42/attempts", Some(&stranger))?,
        post_as("/deals/42/pin", &stranger)?,
    ] {
        let (status, err) = send(&app, req).await?;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(err["error"], "not_deal_vendor");
    }
    assert!(h.store.secret(42).is_none());

    // 3) Each vendor sees its own
    let (status, _) = send(&app, get_as("/deals/42/pin/current", Some(&owner))?).await?;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, get_as("/deals/60/attempts", Some(&stranger))?).await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}
