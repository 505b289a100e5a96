use std::time::Duration;
use tokio::time::Instant;
use tower::{service_fn, Layer, Service, ServiceBuilder, ServiceExt};
use wordpace::{FetchError, LimiterConfig, LimiterError, RateLimitLayer, RateLimiter};

fn limiter() -> RateLimiter {
    RateLimiter::new(LimiterConfig { min_interval_ms: 0, max_requests_per_window: 2, window_duration_ms: 1000 })
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn layered_service_is_paced_by_the_limiter() {
    let limiter = limiter();
    let mut svc = ServiceBuilder::new()
        .layer(RateLimitLayer::new(limiter.clone()))
        .service(service_fn(|word: &'static str| async move {
            Ok::<_, FetchError>((word, Instant::now()))
        }));
    let start = Instant::now();

    let mut stamps = Vec::new();
    for word in ["a", "b", "c"] {
        let (echo, at) = svc.ready().await.unwrap().call(word).await.unwrap();
        assert_eq!(echo, word);
        stamps.push(at - start);
    }

    assert!(stamps[1] < Duration::from_millis(1000));
    assert!(stamps[2] >= Duration::from_millis(1000));
    assert_eq!(svc.limiter().status().remaining_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn inner_errors_surface_as_task_errors() {
    let svc = RateLimitLayer::new(limiter()).layer(service_fn(|_: ()| async {
        Err::<(), _>(FetchError::Network("reset".into()))
    }));

    let err = svc.oneshot(()).await.unwrap_err();

    assert_eq!(err, LimiterError::Task(FetchError::Network("reset".into())));
    assert_eq!(FetchError::from(err).kind(), wordpace::ErrorKind::TransientNetwork);
}
