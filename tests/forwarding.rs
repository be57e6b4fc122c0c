//! End-to-end forwarding through a running relay.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::Value;

use relay_proxy::config::UpstreamTarget;
use relay_proxy::http::{Forwarder, HttpServer};
use relay_proxy::lifecycle::{ProxyRuntime, TerminationReason};
use relay_proxy::observability::{ChannelTraceSink, NoopSink};

mod common;

async fn start_relay(upstream: SocketAddr) -> (ProxyRuntime, SocketAddr) {
    let config = common::relay_config(upstream);
    let resolved = config.upstream.resolve().unwrap();
    let mut runtime = ProxyRuntime::new(HttpServer::from_config(&config, resolved).unwrap(), config.server.clone());
    let addr = runtime.start().await.unwrap();
    (runtime, addr)
}

#[tokio::test]
async fn rewrites_host_and_keeps_everything_else() {
    let (upstream, hits) = common::start_echo_upstream().await;
    let (mut relay, addr) = start_relay(upstream).await;

    let response = common::client()
        .post(format!("http://{}/foo/bar?x=1&y=two", addr))
        .header("x-custom", "kept")
        .header("authorization", "Bearer abc")
        .body("request body")
        .send()
        .await
        .expect("relay unreachable");

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-upstream-hit"], "1");
    let echoed: Value = response.json().await.unwrap();

    assert_eq!(echoed["method"], "POST");
    assert_eq!(echoed["uri"], "/foo/bar?x=1&y=two");
    assert_eq!(echoed["body"], "request body");
    assert_eq!(echoed["headers"]["host"], "127.0.0.1");
    assert_eq!(echoed["headers"]["x-custom"], "kept");
    assert_eq!(echoed["headers"]["authorization"], "Bearer abc");
    assert_eq!(echoed["headers"]["content-length"], "12");
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    relay.stop(TerminationReason::Interrupt).await.unwrap();
}

#[tokio::test]
async fn every_method_and_path_is_forwarded() {
    let (upstream, hits) = common::start_echo_upstream().await;
    let (mut relay, addr) = start_relay(upstream).await;
    let client = common::client();

    for (method, path) in [
        (reqwest::Method::GET, "/"),
        (reqwest::Method::PUT, "/a"),
        (reqwest::Method::DELETE, "/a/b/c"),
        (reqwest::Method::PATCH, "/api/v1/items/7?expand=true"),
        (reqwest::Method::OPTIONS, "/cors"),
    ] {
        let response = client
            .request(method.clone(), format!("http://{}{}", addr, path))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200, "{} {}", method, path);
        let echoed: Value = response.json().await.unwrap();
        assert_eq!(echoed["method"], method.as_str());
        assert_eq!(echoed["uri"], path);
    }
    assert_eq!(hits.load(Ordering::SeqCst), 5);

    relay.stop(TerminationReason::Interrupt).await.unwrap();
}

#[tokio::test]
async fn repeated_requests_are_independent() {
    let (upstream, hits) = common::start_echo_upstream().await;
    let (mut relay, addr) = start_relay(upstream).await;
    let client = common::client();

    let first = client.get(format!("http://{}/same", addr)).send().await.unwrap();
    let second = client.get(format!("http://{}/same", addr)).send().await.unwrap();

    assert_eq!(first.headers()["x-upstream-hit"], "1");
    assert_eq!(second.headers()["x-upstream-hit"], "2");
    let first: Value = first.json().await.unwrap();
    let second: Value = second.json().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    relay.stop(TerminationReason::Interrupt).await.unwrap();
}

#[tokio::test]
async fn unreachable_upstream_is_bad_gateway() {
    // Bind then drop to get a port nothing listens on.
    let closed = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let (mut relay, addr) = start_relay(closed).await;

    let response = common::client()
        .get(format!("http://{}/anything", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY.as_u16());

    // The relay keeps serving after an upstream failure.
    let again = common::client().get(format!("http://{}/", addr)).send().await.unwrap();
    assert_eq!(again.status(), StatusCode::BAD_GATEWAY.as_u16());

    relay.stop(TerminationReason::Interrupt).await.unwrap();
}

#[tokio::test]
async fn request_traces_reach_the_sink() {
    let (upstream, _) = common::start_echo_upstream().await;
    let config = common::relay_config(upstream);
    let (sink, mut traces) = ChannelTraceSink::new(8);
    let forwarder = Forwarder::new(config.upstream.resolve().unwrap(), Arc::new(sink)).unwrap();
    let mut relay = ProxyRuntime::new(HttpServer::new(forwarder, &config.shutdown), config.server.clone());
    let addr = relay.start().await.unwrap();

    let response = common::client()
        .get(format!("http://{}/traced?q=1", addr))
        .header("x-trace-me", "yes")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let trace = traces.recv().await.unwrap();
    assert_eq!(trace.method, "GET");
    assert_eq!(trace.uri.path_and_query().unwrap().as_str(), "/traced?q=1");
    assert_eq!(trace.headers["x-trace-me"], "yes");
    assert_eq!(trace.peer.map(|p| p.ip()), Some(addr.ip()));

    relay.stop(TerminationReason::Interrupt).await.unwrap();
}

async fn start_tls_relay(upstream: SocketAddr, tls: rustls::ClientConfig) -> (ProxyRuntime, SocketAddr) {
    let config = common::relay_config(upstream);
    let target = UpstreamTarget::new("https", "127.0.0.1", upstream.port());
    let forwarder = Forwarder::with_tls_config(target.resolve().unwrap(), tls, Arc::new(NoopSink));
    let mut runtime = ProxyRuntime::new(HttpServer::new(forwarder, &config.shutdown), config.server.clone());
    let addr = runtime.start().await.unwrap();
    (runtime, addr)
}

#[tokio::test]
async fn forwards_to_https_upstream() {
    let (upstream, hits, tls) = common::start_tls_echo_upstream().await;
    let (mut relay, addr) = start_tls_relay(upstream, tls).await;

    let response = common::client()
        .post(format!("http://{}/secure/path?x=1", addr))
        .body("over tls")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let echoed: Value = response.json().await.unwrap();
    assert_eq!(echoed["method"], "POST");
    assert_eq!(echoed["uri"], "/secure/path?x=1");
    assert_eq!(echoed["body"], "over tls");
    assert_eq!(echoed["headers"]["host"], "127.0.0.1");
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    relay.stop(TerminationReason::Interrupt).await.unwrap();
}

#[tokio::test]
async fn untrusted_upstream_certificate_is_bad_gateway() {
    let (upstream, hits, _) = common::start_tls_echo_upstream().await;
    let (mut relay, addr) = start_tls_relay(upstream, common::untrusting_tls()).await;

    let response = common::client().get(format!("http://{}/", addr)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY.as_u16());
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    relay.stop(TerminationReason::Interrupt).await.unwrap();
}

#[test]
fn scenario_upstream_url() {
    let target = UpstreamTarget::new("https", "example.internal", 443);
    assert_eq!(target.url(), "https://example.internal:443");

    let upstream = target.resolve().unwrap();
    let rewritten = upstream.rewrite_uri(&"http://localhost:9090/foo?x=1".parse().unwrap()).unwrap();
    assert_eq!(rewritten.to_string(), "https://example.internal:443/foo?x=1");
    assert_eq!(upstream.host_header(), "example.internal");
}
