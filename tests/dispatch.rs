mod common;

use common::{get, Behaviour, CountingTransport, MockConnector};
use reqwest_middleware::ClientBuilder;
use reqwest_proxy_dispatch::{
    AttemptError, DispatchError, Dispatcher, Proxy, ProxyPool, ProxyPoolConfig,
    ProxyPoolMiddleware, ProxyType, Tier,
};
use std::sync::Arc;

fn proxy(port: u16) -> Proxy {
    Proxy::new("10.1.0.1", port, ProxyType::Http)
}

fn pool_with(proxies: &[Proxy]) -> Arc<ProxyPool> {
    let pool = Arc::new(ProxyPool::new(10));
    for p in proxies {
        assert!(pool.add(p.clone()));
    }
    pool
}

fn stats_of(pool: &ProxyPool, proxy: &Proxy) -> reqwest_proxy_dispatch::Stats {
    let address = proxy.address();
    for _ in 0..pool.size() {
        let handle = pool.next().expect("active proxy");
        if handle.proxy().address() == address {
            return *handle.stats();
        }
    }
    panic!("{} is not active", address);
}

#[tokio::test]
async fn failing_proxy_is_tried_max_retries_times_then_fallback() {
    let pool = pool_with(&[proxy(1)]);
    let connector = Arc::new(MockConnector::new(Behaviour::Refuse));
    let fallback = CountingTransport::new(Behaviour::Status(200));
    let config = ProxyPoolConfig::builder()
        .max_retries(3)
        .fallback(fallback.clone())
        .build();
    let dispatcher = Dispatcher::with_connector(Arc::clone(&pool), &config, connector.clone());

    let response = dispatcher.dispatch(get("http://example.com/")).await.unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(fallback.calls(), 1);
    assert_eq!(connector.connects(&proxy(1).address()), 3);
    let stats = stats_of(&pool, &proxy(1));
    assert_eq!((stats.total, stats.failures, stats.successes), (3, 3, 0));
}

#[tokio::test]
async fn exhausted_retries_without_fallback_wrap_last_error() {
    let pool = pool_with(&[proxy(1)]);
    let connector = Arc::new(MockConnector::new(Behaviour::Refuse));
    let config = ProxyPoolConfig::builder().max_retries(3).no_fallback().build();
    let dispatcher = Dispatcher::with_connector(Arc::clone(&pool), &config, connector);

    let err = dispatcher.dispatch(get("http://example.com/")).await.unwrap_err();

    assert!(err.to_string().contains("all 3 proxy attempts failed"), "{err}");
    assert!(matches!(
        err,
        DispatchError::AllAttemptsFailed {
            attempts: 3,
            source: AttemptError::Transport(_)
        }
    ));
    assert!(err.proxies_attempted());
    assert!(!err.fallback_attempted());
}

#[tokio::test]
async fn status_outside_good_codes_is_a_failure() {
    let pool = pool_with(&[proxy(1)]);
    let connector = Arc::new(MockConnector::new(Behaviour::Status(403)));
    let config = ProxyPoolConfig::builder()
        .max_retries(2)
        .good_codes([200, 301, 302])
        .no_fallback()
        .build();
    let dispatcher = Dispatcher::with_connector(Arc::clone(&pool), &config, connector);

    let err = dispatcher.dispatch(get("http://example.com/")).await.unwrap_err();

    match err {
        DispatchError::AllAttemptsFailed {
            attempts,
            source: AttemptError::BadStatus(status),
        } => {
            assert_eq!(attempts, 2);
            assert_eq!(status, 403);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(stats_of(&pool, &proxy(1)).failures, 2);
}

#[tokio::test]
async fn success_stops_retrying() {
    let pool = pool_with(&[proxy(1), proxy(2), proxy(3)]);
    let connector = Arc::new(
        MockConnector::new(Behaviour::Status(200)).script(&proxy(1).address(), Behaviour::Refuse),
    );
    let fallback = CountingTransport::new(Behaviour::Status(200));
    let config = ProxyPoolConfig::builder().max_retries(3).fallback(fallback.clone()).build();
    let dispatcher = Dispatcher::with_connector(Arc::clone(&pool), &config, connector.clone());

    let response = dispatcher.dispatch(get("http://example.com/")).await.unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(fallback.calls(), 0);
    assert_eq!(connector.total_connects(), 2);
    assert_eq!(stats_of(&pool, &proxy(1)).failures, 1);
    assert_eq!(stats_of(&pool, &proxy(2)).successes, 1);
    assert_eq!(stats_of(&pool, &proxy(3)).total, 0);
}

#[tokio::test]
async fn empty_pool_without_fallback() {
    let pool = Arc::new(ProxyPool::new(5));
    let config = ProxyPoolConfig::builder().no_fallback().build();
    let dispatcher = Dispatcher::with_connector(
        pool,
        &config,
        Arc::new(MockConnector::new(Behaviour::Status(200))),
    );

    let err = dispatcher.dispatch(get("http://example.com/")).await.unwrap_err();
    assert!(matches!(err, DispatchError::NoProxyAvailable));
    assert!(!err.proxies_attempted());
}

#[tokio::test]
async fn empty_pool_goes_straight_to_fallback() {
    let pool = Arc::new(ProxyPool::new(5));
    let fallback = CountingTransport::new(Behaviour::Status(204));
    let config = ProxyPoolConfig::builder().fallback(fallback.clone()).build();
    let dispatcher = Dispatcher::with_connector(
        pool,
        &config,
        Arc::new(MockConnector::new(Behaviour::Status(200))),
    );

    let response = dispatcher.dispatch(get("http://example.com/")).await.unwrap();
    assert_eq!(response.status(), 204);
    assert_eq!(fallback.calls(), 1);
}

#[tokio::test]
async fn failing_fallback_reports_both_errors() {
    let pool = pool_with(&[proxy(1)]);
    let fallback = CountingTransport::new(Behaviour::Refuse);
    let config = ProxyPoolConfig::builder().max_retries(2).fallback(fallback.clone()).build();
    let dispatcher = Dispatcher::with_connector(
        pool,
        &config,
        Arc::new(MockConnector::new(Behaviour::Refuse)),
    );

    let err = dispatcher.dispatch(get("http://example.com/")).await.unwrap_err();
    let message = err.to_string();

    assert!(err.fallback_attempted());
    assert!(err.proxies_attempted());
    assert!(message.contains("all 2 proxy attempts failed"), "{message}");
    assert!(message.contains("connection refused"), "{message}");
    assert!(message.contains("fallback unreachable"), "{message}");
}

#[tokio::test]
async fn failing_fallback_with_empty_pool() {
    let pool = Arc::new(ProxyPool::new(5));
    let config = ProxyPoolConfig::builder()
        .fallback(CountingTransport::new(Behaviour::Refuse))
        .build();
    let dispatcher = Dispatcher::with_connector(
        pool,
        &config,
        Arc::new(MockConnector::new(Behaviour::Status(200))),
    );

    let err = dispatcher.dispatch(get("http://example.com/")).await.unwrap_err();
    assert!(matches!(err, DispatchError::FallbackFailed { attempts: 0, last: None, .. }));
    assert!(err.to_string().starts_with("no proxies available"));
}

#[tokio::test]
async fn bad_proxy_is_quarantined_without_using_an_attempt() {
    let pool = pool_with(&[proxy(1), proxy(2)]);
    for _ in 0..10 {
        pool.record_failure(&proxy(1));
    }
    let connector = Arc::new(MockConnector::new(Behaviour::Status(200)));
    let config = ProxyPoolConfig::builder().max_retries(1).no_fallback().build();
    let dispatcher = Dispatcher::with_connector(Arc::clone(&pool), &config, connector.clone());

    let response = dispatcher.dispatch(get("http://example.com/")).await.unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(pool.tier_of(&proxy(1).address()), Some(Tier::Bad));
    assert_eq!(connector.connects(&proxy(1).address()), 0);
    assert_eq!(connector.connects(&proxy(2).address()), 1);
}

#[tokio::test]
async fn only_bad_proxies_means_no_proxy() {
    let pool = pool_with(&[proxy(1)]);
    for _ in 0..10 {
        pool.record_failure(&proxy(1));
    }
    let config = ProxyPoolConfig::builder().no_fallback().build();
    let dispatcher = Dispatcher::with_connector(
        Arc::clone(&pool),
        &config,
        Arc::new(MockConnector::new(Behaviour::Status(200))),
    );

    let err = dispatcher.dispatch(get("http://example.com/")).await.unwrap_err();
    assert!(matches!(err, DispatchError::NoProxyAvailable));
    assert_eq!(pool.bad_size(), 1);
}

#[tokio::test]
async fn socks4_attempts_fail_as_unsupported() {
    let socks4 = Proxy::new("10.1.0.4", 4145, ProxyType::Socks4);
    let pool = pool_with(&[socks4.clone()]);
    let config = ProxyPoolConfig::builder().max_retries(1).no_fallback().build();
    let dispatcher = Dispatcher::with_connector(
        Arc::clone(&pool),
        &config,
        Arc::new(MockConnector::new(Behaviour::Status(200))),
    );

    let err = dispatcher.dispatch(get("http://example.com/")).await.unwrap_err();
    assert!(matches!(
        err,
        DispatchError::AllAttemptsFailed {
            source: AttemptError::UnsupportedProxyType(ProxyType::Socks4),
            ..
        }
    ));
    assert_eq!(stats_of(&pool, &socks4).failures, 1);
}

#[tokio::test]
async fn concurrent_dispatches_are_all_recorded() {
    let proxies = [proxy(1), proxy(2), proxy(3)];
    let pool = pool_with(&proxies);
    let config = ProxyPoolConfig::builder().no_fallback().build();
    let dispatcher = Arc::new(Dispatcher::with_connector(
        Arc::clone(&pool),
        &config,
        Arc::new(MockConnector::new(Behaviour::Status(200))),
    ));

    let tasks: Vec<_> = (0..30)
        .map(|_| {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.dispatch(get("http://example.com/")).await })
        })
        .collect();
    for task in tasks {
        assert!(task.await.unwrap().is_ok());
    }

    let successes: u64 = proxies.iter().map(|p| stats_of(&pool, p).successes).sum();
    assert_eq!(successes, 30);
}

#[tokio::test]
async fn rate_limited_proxies_still_dispatch() {
    let pool = Arc::new(ProxyPool::new(2).with_max_requests_per_second(Some(100.0)));
    pool.add(proxy(1));
    let config = ProxyPoolConfig::builder().no_fallback().build();
    let dispatcher = Dispatcher::with_connector(
        Arc::clone(&pool),
        &config,
        Arc::new(MockConnector::new(Behaviour::Status(200))),
    );

    for _ in 0..3 {
        assert!(dispatcher.dispatch(get("http://example.com/")).await.is_ok());
    }
    assert_eq!(stats_of(&pool, &proxy(1)).successes, 3);
}

#[tokio::test]
async fn middleware_routes_through_the_pool() {
    let pool = pool_with(&[proxy(1)]);
    let connector = Arc::new(MockConnector::new(Behaviour::Status(201)));
    let config = ProxyPoolConfig::builder().no_fallback().build();
    let dispatcher = Arc::new(Dispatcher::with_connector(
        Arc::clone(&pool),
        &config,
        connector.clone(),
    ));

    let client = ClientBuilder::new(reqwest::Client::new())
        .with(ProxyPoolMiddleware::new(dispatcher))
        .build();
    let response = client.get("http://example.com/").send().await.unwrap();

    assert_eq!(response.status(), 201);
    assert_eq!(connector.connects(&proxy(1).address()), 1);
}

#[tokio::test]
async fn middleware_surfaces_dispatch_errors() {
    let pool = Arc::new(ProxyPool::new(1));
    let config = ProxyPoolConfig::builder().no_fallback().build();
    let dispatcher = Arc::new(Dispatcher::with_connector(
        pool,
        &config,
        Arc::new(MockConnector::new(Behaviour::Status(200))),
    ));

    let client = ClientBuilder::new(reqwest::Client::new())
        .with(ProxyPoolMiddleware::new(dispatcher))
        .build();
    let err = client.get("http://example.com/").send().await.unwrap_err();

    assert!(matches!(err, reqwest_middleware::Error::Middleware(_)));
    assert!(err.to_string().contains("no proxies available"), "{err}");
}

fn streaming_post(url: &str) -> reqwest::Request {
    let mut request = reqwest::Request::new(http::Method::POST, url.parse().expect("valid url"));
    let chunks = futures::stream::iter(vec![Ok::<_, std::io::Error>("payload")]);
    *request.body_mut() = Some(reqwest::Body::wrap_stream(chunks));
    request
}

#[tokio::test]
async fn streaming_body_goes_straight_to_fallback() {
    let pool = pool_with(&[proxy(1), proxy(2)]);
    let connector = Arc::new(MockConnector::new(Behaviour::Status(200)));
    let fallback = CountingTransport::new(Behaviour::Status(201));
    let config = ProxyPoolConfig::builder().fallback(fallback.clone()).build();
    let dispatcher = Dispatcher::with_connector(Arc::clone(&pool), &config, connector.clone());

    let response = dispatcher.dispatch(streaming_post("http://example.com/upload")).await.unwrap();

    assert_eq!(response.status(), 201);
    assert_eq!(fallback.calls(), 1);
    assert_eq!(connector.total_connects(), 0);
}

#[tokio::test]
async fn streaming_body_without_fallback_is_rejected() {
    let pool = pool_with(&[proxy(1)]);
    let connector = Arc::new(MockConnector::new(Behaviour::Status(200)));
    let config = ProxyPoolConfig::builder().no_fallback().build();
    let dispatcher = Dispatcher::with_connector(Arc::clone(&pool), &config, connector.clone());

    let err = dispatcher
        .dispatch(streaming_post("http://example.com/upload"))
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::RequestNotCloneable));
    assert_eq!(connector.total_connects(), 0);
}
