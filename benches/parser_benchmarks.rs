//! Performance benchmarks for the per-request hot paths: request-head
//! parsing, header filtering, and body classification.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use veil_proxy::headers::HeaderStore;
use veil_proxy::relay::classify;
use veil_proxy::request::parse_client_request;

const RAW_REQUEST: &[u8] = b"GET http://example.test/assets/photo.jpeg HTTP/1.1\r\n\
Host: example.test\r\n\
User-Agent: bench-client/1.0\r\n\
Accept: image/jpeg,image/png;q=0.9,*/*;q=0.8\r\n\
Referer: http://example.test/gallery\r\n\
Cookie: session=0123456789abcdef; theme=dark\r\n\
X-Request-Id: 42\r\n\
\r\n";

/// Benchmark parsing a complete request head.
fn bench_parse_request(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_parsing");
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();

    group.bench_function("parse_client_request", |b| {
        b.iter(|| {
            let parsed = rt.block_on(async {
                let mut reader = black_box(RAW_REQUEST);
                parse_client_request(&mut reader).await
            });
            black_box(parsed).unwrap();
        });
    });

    group.finish();
}

/// Benchmark header store operations in isolation.
fn bench_header_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("header_store");

    group.bench_function("insert_and_get", |b| {
        b.iter(|| {
            let mut store = HeaderStore::new();
            store.insert("Host", "example.test");
            store.insert("User-Agent", "bench-client/1.0");
            store.insert("Accept", "*/*");
            store.insert("Cookie", "session=0123456789abcdef");
            store.insert("Host", "override.test");
            black_box(store.get("Host"));
        });
    });

    group.bench_function("miss_lookup", |b| {
        let mut store = HeaderStore::new();
        store.insert("Host", "example.test");
        store.insert("Accept", "*/*");
        b.iter(|| {
            black_box(store.get("Authorization"));
        });
    });

    group.finish();
}

/// Benchmark content-type classification.
fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classification");

    group.bench_function("classify_content_type", |b| {
        b.iter(|| {
            black_box(classify(black_box(Some("image/jpeg"))));
            black_box(classify(black_box(Some("text/html; charset=utf-8"))));
            black_box(classify(black_box(None)));
        });
    });

    group.finish();
}

criterion_group!(benches, bench_parse_request, bench_header_store, bench_classify);
criterion_main!(benches);
