// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP sync channels against a mock flag server.

use std::time::Duration;

use futures::StreamExt;
use loom_flagsync::config::SyncMode;
use loom_flagsync::{
	EvaluationContext, PollingSyncChannel, Reason, Resolver, ResolverConfig, SseSyncChannel,
	SyncChannel, SyncError, SyncMessage,
};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FLAGS: &str = concat!(
	r#"{"flags":{"new-ui":{"state":"ENABLED","#,
	r#""variants":{"on":true,"off":false},"defaultVariant":"on"}}}"#,
);

fn sse_body(events: &[(&str, &str, &str)]) -> String {
	events
		.iter()
		.map(|(event, id, data)| {
			let id = if id.is_empty() {
				String::new()
			} else {
				format!("id: {id}\n")
			};
			format!("event: {event}\n{id}data: {data}\n\n")
		})
		.collect()
}

fn config_for(server: &MockServer, sync_mode: SyncMode) -> ResolverConfig {
	ResolverConfig {
		host: server.address().ip().to_string(),
		port: server.address().port(),
		sync_mode,
		poll_interval: Duration::from_millis(20),
		retry_backoff: Duration::from_millis(5),
		retry_backoff_max: Duration::from_millis(20),
		deadline: Duration::from_secs(5),
		..Default::default()
	}
}

#[tokio::test]
async fn sse_session_delivers_configuration_and_heartbeats() {
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/sync/stream"))
		.and(query_param("selector", "app=web"))
		.and(header("authorization", "Bearer secret"))
		.respond_with(
			ResponseTemplate::new(200)
				.insert_header("content-type", "text/event-stream")
				.set_body_string(sse_body(&[
					("configuration", "7", FLAGS),
					("heartbeat", "", "{}"),
					("patch", "8", r#"{"removed":["new-ui"]}"#),
				])),
		)
		.mount(&server)
		.await;

	let channel = SseSyncChannel::new(
		reqwest::Client::new(),
		format!("{}/sync/stream", server.uri()),
		Duration::from_secs(5),
		Some("app=web".to_string()),
		Some("secret".to_string()),
	);
	let mut session = channel.open(&CancellationToken::new()).await.unwrap();

	let Some(Ok(SyncMessage::Configuration(full))) = session.next().await else {
		panic!("expected a full configuration");
	};
	assert_eq!(full.version.as_deref(), Some("7"));
	assert_eq!(full.metadata.get("selector"), Some("app=web"));
	assert!(!full.content.is_delta());

	assert!(matches!(session.next().await, Some(Ok(SyncMessage::Heartbeat))));

	let Some(Ok(SyncMessage::Configuration(delta))) = session.next().await else {
		panic!("expected a delta");
	};
	assert!(delta.content.is_delta());
	assert_eq!(delta.version.as_deref(), Some("8"));

	assert!(session.next().await.is_none());
}

#[tokio::test]
async fn sse_rejected_token_is_not_retryable() {
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/sync/stream"))
		.respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
		.mount(&server)
		.await;

	let channel = SseSyncChannel::new(
		reqwest::Client::new(),
		format!("{}/sync/stream", server.uri()),
		Duration::from_secs(5),
		None,
		Some("wrong".to_string()),
	);
	let err = match channel.open(&CancellationToken::new()).await {
		Ok(_) => panic!("expected the open to fail"),
		Err(err) => err,
	};
	assert!(matches!(err, SyncError::Http { status: 401, .. }));
	assert!(!err.is_retryable());
}

#[tokio::test]
async fn poll_revalidates_with_etag() {
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/sync/flags"))
		.and(header("if-none-match", "\"v1\""))
		.respond_with(ResponseTemplate::new(304))
		.with_priority(1)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/sync/flags"))
		.respond_with(
			ResponseTemplate::new(200)
				.insert_header("etag", "\"v1\"")
				.set_body_string(FLAGS),
		)
		.mount(&server)
		.await;

	let channel = PollingSyncChannel::new(
		reqwest::Client::new(),
		format!("{}/sync/flags", server.uri()),
		Duration::from_millis(20),
		None,
		None,
	);
	let mut session = channel.open(&CancellationToken::new()).await.unwrap();

	let Some(Ok(SyncMessage::Configuration(payload))) = session.next().await else {
		panic!("expected a configuration");
	};
	assert_eq!(payload.version.as_deref(), Some("\"v1\""));
	assert_eq!(payload.metadata.get("etag"), Some("\"v1\""));
	assert_eq!(channel.etag().as_deref(), Some("\"v1\""));

	assert!(matches!(session.next().await, Some(Ok(SyncMessage::Heartbeat))));
}

#[tokio::test]
async fn poll_failure_degrades_before_failing() {
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/sync/flags"))
		.respond_with(ResponseTemplate::new(200).set_body_string(FLAGS))
		.up_to_n_times(1)
		.with_priority(1)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/sync/flags"))
		.respond_with(ResponseTemplate::new(503))
		.mount(&server)
		.await;

	let channel = PollingSyncChannel::new(
		reqwest::Client::new(),
		format!("{}/sync/flags", server.uri()),
		Duration::from_millis(10),
		None,
		None,
	);
	let mut session = channel.open(&CancellationToken::new()).await.unwrap();

	assert!(matches!(session.next().await, Some(Ok(SyncMessage::Configuration(_)))));
	assert!(matches!(session.next().await, Some(Ok(SyncMessage::Degraded(_)))));
	assert!(matches!(
		session.next().await,
		Some(Err(SyncError::Http { status: 503, .. }))
	));
	assert!(session.next().await.is_none());
}

#[tokio::test]
async fn resolver_over_sse() {
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/sync/stream"))
		.respond_with(
			ResponseTemplate::new(200)
				.insert_header("content-type", "text/event-stream")
				.set_body_string(sse_body(&[("configuration", "1", FLAGS)])),
		)
		.mount(&server)
		.await;

	let resolver = Resolver::from_config(&config_for(&server, SyncMode::Stream)).unwrap();
	resolver.init().await.unwrap();

	let details = resolver.resolve_boolean_value("new-ui", false, &EvaluationContext::new());
	assert!(details.value);
	assert_eq!(details.reason, Reason::Static);
	assert_eq!(resolver.metadata().get("source"), Some("sse"));
	resolver.shutdown().await;
}

#[tokio::test]
async fn resolver_over_polling() {
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/sync/flags"))
		.respond_with(ResponseTemplate::new(200).set_body_string(FLAGS))
		.mount(&server)
		.await;

	let resolver = Resolver::from_config(&config_for(&server, SyncMode::Poll)).unwrap();
	resolver.init().await.unwrap();

	assert!(resolver
		.resolve_boolean_value("new-ui", false, &EvaluationContext::new())
		.value);
	assert_eq!(resolver.metadata().get("source"), Some("poll"));
	resolver.shutdown().await;
}
