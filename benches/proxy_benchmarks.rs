use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use forward_proxy::rate_limit::{
    Condition, InboundRequest, KeyGenerator, Limit, LocalRateLimiter, RateLimitEngine,
    RateLimitRule, RateLimiterBackend,
};
use forward_proxy::transform::{DefaultHeaderPolicy, HeaderPolicy};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use std::net::SocketAddr;
use std::sync::Arc;

fn sample_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("accept", HeaderValue::from_static("application/json"));
    headers.insert("authorization", HeaderValue::from_static("Bearer t0k3n"));
    headers.insert("user-agent", HeaderValue::from_static("bench/1.0"));
    headers.insert("cookie", HeaderValue::from_static("session=abc"));
    headers.insert("x-api-token", HeaderValue::from_static("abc123"));
    headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
    headers
}

fn benchmark_conditions(c: &mut Criterion) {
    let headers = sample_headers();
    let method = Method::POST;
    let addr: SocketAddr = "10.0.0.1:5000".parse().unwrap();
    let request = InboundRequest::new(&method, "/items/MLA123/description", &headers, Some(addr));

    let simple = Condition::path_starts_with("/items");
    let nested = Condition::path_starts_with("/items")
        .and(Condition::method_in([Method::POST, Method::PUT]))
        .and(!Condition::has_header(HeaderName::from_static("x-internal")))
        .or(Condition::path_matches("/secure/**").unwrap());

    let mut group = c.benchmark_group("condition");
    group.bench_function("path_prefix", |b| {
        b.iter(|| black_box(simple.test(black_box(&request))))
    });
    group.bench_function("nested", |b| {
        b.iter(|| black_box(nested.test(black_box(&request))))
    });
    group.finish();
}

fn benchmark_keys(c: &mut Criterion) {
    let headers = sample_headers();
    let method = Method::GET;
    let request = InboundRequest::new(&method, "/secure/orders/42", &headers, None);

    let keys = [
        ("client_ip", KeyGenerator::client_ip()),
        (
            "ip_path_token",
            KeyGenerator::compose([
                KeyGenerator::client_ip(),
                KeyGenerator::path(),
                KeyGenerator::header(HeaderName::from_static("x-api-token")),
            ]),
        ),
    ];

    let mut group = c.benchmark_group("key");
    for (name, key) in keys.iter() {
        group.bench_with_input(BenchmarkId::from_parameter(name), key, |b, key| {
            b.iter(|| black_box(key.key(black_box(&request))))
        });
    }
    group.finish();
}

fn benchmark_memory_backend(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let limiter = LocalRateLimiter::new();
    let limit = Limit::per_minute(u32::MAX).unwrap();

    let mut group = c.benchmark_group("memory_backend");
    for keys in [1usize, 1_000] {
        let names: Vec<String> = (0..keys).map(|i| format!("ip:10.0.{}.{}", i / 256, i % 256)).collect();
        group.bench_with_input(BenchmarkId::new("try_consume", keys), &names, |b, names| {
            let mut i = 0usize;
            b.to_async(&runtime).iter(|| {
                i = (i + 1) % names.len();
                let key = &names[i];
                let limiter = &limiter;
                async move { black_box(limiter.try_consume(key, 1, &limit).await.unwrap()) }
            })
        });
    }
    group.finish();
}

fn benchmark_engine(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let backend: Arc<dyn RateLimiterBackend> = Arc::new(LocalRateLimiter::new());

    let rules = vec![
        RateLimitRule::builder("ip")
            .key(KeyGenerator::client_ip())
            .limit(Limit::per_minute(u32::MAX).unwrap())
            .backend(backend.clone())
            .build()
            .unwrap(),
        RateLimitRule::builder("items_ip")
            .when(Condition::path_starts_with("/items"))
            .key(KeyGenerator::compose([
                KeyGenerator::client_ip(),
                KeyGenerator::constant("/items"),
            ]))
            .limit(Limit::per_minute(u32::MAX).unwrap())
            .backend(backend)
            .build()
            .unwrap(),
    ];
    let engine = RateLimitEngine::new(rules);
    let headers = sample_headers();
    let method = Method::GET;
    let request = InboundRequest::new(&method, "/items/1", &headers, None);

    c.bench_function("engine_evaluate", |b| {
        b.to_async(&runtime).iter(|| {
            let engine = &engine;
            let request = &request;
            async move { black_box(engine.evaluate(request).await.unwrap()) }
        })
    });
}

fn benchmark_header_policy(c: &mut Criterion) {
    let inbound = sample_headers();
    let mut backend = HeaderMap::new();
    backend.insert("content-type", HeaderValue::from_static("application/json"));
    backend.insert("connection", HeaderValue::from_static("keep-alive"));
    backend.insert("transfer-encoding", HeaderValue::from_static("chunked"));
    backend.insert("x-backend", HeaderValue::from_static("items"));

    let policy = DefaultHeaderPolicy;

    let mut group = c.benchmark_group("header_policy");
    group.bench_function("to_backend", |b| {
        b.iter(|| black_box(policy.to_backend(black_box(&inbound), "req-123")))
    });
    group.bench_function("to_client", |b| {
        b.iter(|| black_box(policy.to_client(black_box(&backend), "req-123")))
    });
    group.finish();
}

criterion_group!(
    benches,
    benchmark_conditions,
    benchmark_keys,
    benchmark_memory_backend,
    benchmark_engine,
    benchmark_header_policy
);
criterion_main!(benches);
