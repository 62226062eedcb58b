//! End-to-end wiring of every extension point.

mod common;

use common::{fast_config, statement, FakeError};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use weft_lib::core::ConfigBuilder;
use weft_lib::interceptor::{ExecutionInfo, InvocationContext, MethodInfo};
use weft_lib::metrics::{AdditionalAttributes, Signature};
use weft_lib::provider::{points, Provider};
use weft_lib::report::ChannelReportSink;

fn call(provider: &Provider, key: &str, method: MethodInfo<'static>, fail: bool) {
    let _: Result<(), FakeError> =
        provider
            .invoker()
            .invoke(key, method, &mut InvocationContext::new(), || {
                if fail {
                    Err(FakeError("boom"))
                } else {
                    Ok(())
                }
            });
}

#[test]
fn test_every_point_has_a_chain() {
    let (sink, _rx) = ChannelReportSink::unbounded();
    let provider = Provider::new(fast_config(Duration::from_secs(60)), Arc::new(sink)).unwrap();

    let mut expected: Vec<String> = points::METERED.iter().map(|k| k.to_string()).collect();
    expected.push(points::KAFKA_PRODUCER_CALLBACK.to_string());
    expected.sort();
    assert_eq!(provider.invoker().keys(), expected);

    for key in points::METERED {
        assert!(provider.metrics(key).is_some(), "{key} has no metrics");
        assert!(!provider.reporter(key).unwrap().is_running());
    }
    assert!(provider.metrics(points::KAFKA_PRODUCER_CALLBACK).is_none());
}

#[test]
fn test_report_now_covers_each_point_with_its_key_field() {
    let (sink, rx) = ChannelReportSink::unbounded();
    let provider = Provider::with_attributes(
        fast_config(Duration::from_secs(60)),
        Arc::new(sink),
        AdditionalAttributes::new().with("host", "web-01"),
    )
    .unwrap();

    call(
        &provider,
        points::JDBC_CONNECTION,
        MethodInfo::new("DataSource", "getConnection").with_arg("jdbc:mysql://db:3306/app"),
        false,
    );
    call(&provider, points::JDBC_STATEMENT, statement("delete from t where id in (1, 2)"), true);
    call(
        &provider,
        points::HTTP_FILTER,
        MethodInfo::new("Filter", "doFilter").with_arg("/orders?page=2"),
        false,
    );
    call(&provider, points::REDIS, MethodInfo::new("Jedis", "sendCommand").with_arg("hget user:1 name"), false);

    assert_eq!(provider.report_now().unwrap(), 4);

    let mut items: Vec<_> = rx.try_iter().collect();
    items.sort_by(|a, b| a.key.cmp(&b.key));
    let keys: Vec<&str> = items.iter().map(|i| i.key.as_str()).collect();
    assert_eq!(keys, vec!["http_filter", "jdbc_connection", "jdbc_statement", "redis"]);

    let http = items[0].find("url", "/orders").unwrap();
    assert_eq!(http["type"], "http-request");
    assert_eq!(http["host"], "web-01");

    let conn = items[1].find("url", "jdbc:mysql://db:3306/app").unwrap();
    assert_eq!(conn["type"], "jdbc-connection");

    let stmt = items[2].find("signature", "delete from t where id in (?)").unwrap();
    assert_eq!(stmt["errcnt"], 1);

    let redis = items[3].find("signature", "HGET").unwrap();
    assert_eq!(redis["category"], "application");
}

#[test]
fn test_sync_and_async_sends_share_producer_metrics() {
    let (sink, _rx) = ChannelReportSink::unbounded();
    let provider = Provider::new(fast_config(Duration::from_secs(60)), Arc::new(sink)).unwrap();

    // one synchronous send, completed on the producer chain
    call(&provider, points::KAFKA_PRODUCER, MethodInfo::new("KafkaProducer", "send").with_arg("audit"), false);
    // one asynchronous send, completed only on the callback chain
    call(
        &provider,
        points::KAFKA_PRODUCER_CALLBACK,
        MethodInfo::new("Callback", "onCompletion").with_arg("audit"),
        true,
    );

    let family = provider
        .metrics(points::KAFKA_PRODUCER)
        .unwrap()
        .family(&Signature::from("audit"))
        .unwrap();
    assert_eq!(family.count(), 2);
    assert_eq!(family.error_count(), 1);
}

#[test]
fn test_statement_signature_prefers_execution_info() {
    let (sink, _rx) = ChannelReportSink::unbounded();
    let provider = Provider::new(fast_config(Duration::from_secs(60)), Arc::new(sink)).unwrap();

    let mut ctx = InvocationContext::new().with(ExecutionInfo::new("select name from users where id = 9"));
    let _: Result<(), FakeError> = provider.invoker().invoke(
        points::JDBC_STATEMENT,
        MethodInfo::new("PreparedStatement", "execute"),
        &mut ctx,
        || Ok(()),
    );

    let metrics = provider.metrics(points::JDBC_STATEMENT).unwrap();
    assert!(metrics.is_live(&Signature::from("select name from users where id = ?")));
}

#[test]
fn test_per_point_capacity_applies() {
    let config = ConfigBuilder::new()
        .cache_capacity(100)
        .point_capacity(points::REDIS, 2)
        .build()
        .unwrap();
    let (sink, _rx) = ChannelReportSink::unbounded();
    let provider = Provider::new(config, Arc::new(sink)).unwrap();

    for command in ["GET a", "SET a", "DEL a", "INCR a"] {
        call(&provider, points::REDIS, MethodInfo::new("Jedis", "sendCommand").with_arg(command), false);
    }

    let redis = provider.metrics(points::REDIS).unwrap();
    assert_eq!(redis.capacity(), 2);
    assert_eq!(redis.family_count(), 2);
    assert!(redis.is_live(&Signature::from("INCR")));
    assert_eq!(provider.metrics(points::HTTP_FILTER).unwrap().capacity(), 100);
}

#[test]
fn test_shutdown_unregisters_chains() {
    let (sink, _rx) = ChannelReportSink::unbounded();
    let provider = Provider::new(fast_config(Duration::from_secs(60)), Arc::new(sink)).unwrap();
    call(&provider, points::REDIS, MethodInfo::new("Jedis", "sendCommand").with_arg("GET k"), false);

    provider.shutdown();

    assert!(provider.invoker().is_empty());
    assert_eq!(provider.metrics(points::REDIS).unwrap().family_count(), 0);

    // calls after shutdown go straight through
    let result: Result<u8, FakeError> = provider.invoker().invoke(
        points::REDIS,
        MethodInfo::new("Jedis", "sendCommand").with_arg("GET k"),
        &mut InvocationContext::new(),
        || Ok(3),
    );
    assert_eq!(result, Ok(3));
    assert_eq!(provider.metrics(points::REDIS).unwrap().family_count(), 0);
}

#[test]
fn test_start_requires_runtime() {
    let (sink, _rx) = ChannelReportSink::unbounded();
    let provider = Provider::new(fast_config(Duration::from_secs(60)), Arc::new(sink)).unwrap();
    assert!(provider.start().is_err());
}

#[test]
fn test_report_now_skips_disabled_points() {
    let config = ConfigBuilder::new()
        .point_enabled(points::REDIS, false)
        .build()
        .unwrap();
    let (sink, rx) = ChannelReportSink::unbounded();
    let provider = Provider::new(config, Arc::new(sink)).unwrap();

    call(&provider, points::REDIS, MethodInfo::new("Jedis", "sendCommand").with_arg("GET k"), false);
    call(&provider, points::HTTP_FILTER, MethodInfo::new("Filter", "doFilter").with_arg("/health"), false);

    assert_eq!(provider.report_now().unwrap(), 1);
    let keys: Vec<String> = rx.try_iter().map(|item| item.key).collect();
    assert_eq!(keys, vec!["http_filter".to_string()]);
}
