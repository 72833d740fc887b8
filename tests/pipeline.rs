//! End-to-end scenarios for the generation pipeline's resilience layer:
//! admission check first, then retry with backoff and latency-aware
//! degradation around a scripted backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use draftgate::{
    client_identity, run_with_fallback, AdmissionLayer, Depth, FailureCause, GenerationParams,
    LatencyTarget, LatencyTargets, OperationKind, OutputFormat, PipelineError, RateLimitConfig,
    RateLimiter, RetryPolicy, BASELINE_PROMPT_VERSION,
};
use tower::{service_fn, BoxError, Layer, Service, ServiceExt};

fn scripted_status(status: u16) -> FailureCause {
    FailureCause::HttpStatus {
        status,
        body: Some(format!(r#"{{"error":{{"message":"status {status}"}}}}"#)),
    }
}

#[tokio::test]
async fn recovers_from_repeated_503s_within_backoff_bounds() {
    let policy = RetryPolicy {
        max_retries: 3,
        base_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(200),
    };
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_cl = calls.clone();

    let started = Instant::now();
    let result = run_with_fallback(
        OperationKind::Plan,
        GenerationParams::default(),
        |_params| {
            let calls = calls_cl.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(scripted_status(503))
                } else {
                    Ok("planning document")
                }
            }
        },
        &policy,
        &LatencyTargets::default(),
    )
    .await;
    let elapsed = started.elapsed();

    assert_eq!(result.unwrap(), "planning document");
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    // Three sleeps of 20/40/80ms, each with at most 10% jitter.
    let floor = Duration::from_millis(20 + 40 + 80);
    let ceiling = floor.mul_f64(1.1) + Duration::from_millis(100);
    assert!(elapsed >= floor, "finished too fast: {elapsed:?}");
    assert!(elapsed <= ceiling, "slept too long: {elapsed:?}");
}

#[tokio::test]
async fn not_found_fails_fast_with_one_invocation() {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_cl = calls.clone();

    let started = Instant::now();
    let result: Result<(), _> = run_with_fallback(
        OperationKind::Ux,
        GenerationParams::default(),
        |_params| {
            let calls = calls_cl.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(scripted_status(404))
            }
        },
        &RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        },
        &LatencyTargets::default(),
    )
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // No backoff sleep for a fatal failure.
    assert!(started.elapsed() < Duration::from_millis(500));
    match result {
        Err(PipelineError::UpstreamClient { status, message }) => {
            assert_eq!(status, 404);
            assert_eq!(message, "status 404");
        }
        other => panic!("expected client error, got {other:?}"),
    }
}

#[tokio::test]
async fn slow_first_attempt_gets_a_degraded_fallback() {
    let targets = LatencyTargets {
        ux: LatencyTarget {
            p50: Duration::from_millis(10),
            p95: Duration::from_millis(40),
        },
        ..LatencyTargets::default()
    };
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_cl = seen.clone();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_cl = calls.clone();

    let result = run_with_fallback(
        OperationKind::Ux,
        GenerationParams {
            temperature: 0.7,
            depth: Depth::Deep,
            format: OutputFormat::Markdown,
            revision_notes: Some("x".to_string()),
            prompt_version: Some("exp-12".to_string()),
        },
        |params| {
            let seen = seen_cl.clone();
            let calls = calls_cl.clone();
            async move {
                seen.lock().unwrap().push(params);
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Err(FailureCause::Transport("upstream hung up".into()))
                } else {
                    Ok("design document")
                }
            }
        },
        &RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
        &targets,
    )
    .await;

    assert_eq!(result.unwrap(), "design document");
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    let fallback = &seen[1];
    assert_eq!(fallback.depth, Depth::Standard);
    assert_eq!(fallback.format, OutputFormat::Bulleted);
    assert!((fallback.temperature - 0.6).abs() < 1e-6);
    assert_eq!(fallback.revision_notes, None);
    assert_eq!(fallback.prompt_version.as_deref(), Some(BASELINE_PROMPT_VERSION));
}

#[tokio::test]
async fn admission_denial_precedes_any_attempt() {
    let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
        limit: 1,
        window: Duration::from_secs(600),
    }));
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_cl = calls.clone();

    let backend = service_fn(move |_req: String| {
        let calls = calls_cl.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, BoxError>("generated")
        }
    });
    let mut gated = AdmissionLayer::new(limiter, |identity: &String| identity.clone()).layer(backend);

    let first = ServiceExt::ready(&mut gated)
        .await
        .unwrap()
        .call("203.0.113.7".to_string())
        .await;
    assert_eq!(first.unwrap(), "generated");

    let second = ServiceExt::ready(&mut gated)
        .await
        .unwrap()
        .call("203.0.113.7".to_string())
        .await
        .unwrap_err();
    let denial = second.downcast::<PipelineError>().unwrap();
    assert!(matches!(*denial, PipelineError::RateLimited { .. }));
    // Denied before the backend ran.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rate_limit_window_walk_and_reset() {
    let limiter = RateLimiter::new(RateLimitConfig {
        limit: 10,
        window: Duration::from_millis(60),
    });
    let mut headers = http::HeaderMap::new();
    headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
    let identity = client_identity(&headers);
    assert_eq!(identity, "203.0.113.7");

    for expected_remaining in (0..10).rev() {
        let decision = limiter.check(&identity);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, expected_remaining);
    }
    assert!(!limiter.check(&identity).allowed);

    tokio::time::sleep(Duration::from_millis(80)).await;
    let fresh = limiter.check(&identity);
    assert!(fresh.allowed);
    assert_eq!(fresh.remaining, 9);
}

#[tokio::test]
async fn exhausted_run_reports_the_journey() {
    let targets = LatencyTargets {
        plan: LatencyTarget {
            p50: Duration::from_millis(5),
            p95: Duration::from_millis(15),
        },
        ..LatencyTargets::default()
    };

    let result: Result<(), _> = run_with_fallback(
        OperationKind::Plan,
        GenerationParams {
            temperature: 0.9,
            depth: Depth::Deep,
            format: OutputFormat::Markdown,
            revision_notes: None,
            prompt_version: None,
        },
        |_params| async move {
            tokio::time::sleep(Duration::from_millis(25)).await;
            Err(scripted_status(502))
        },
        &RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
        &targets,
    )
    .await;

    match result {
        Err(PipelineError::Exhausted {
            attempts,
            last_cause,
            final_params,
            params_diff,
        }) => {
            assert_eq!(attempts, 3);
            assert!(matches!(
                last_cause,
                FailureCause::HttpStatus { status: 502, .. }
            ));
            assert_eq!(final_params.depth, Depth::Brief);
            assert!(params_diff.contains("temperature"));
            assert!(params_diff.contains("format markdown -> bulleted"));
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
}
