use std::hint::black_box;
use std::sync::Arc;

use bytes::Bytes;
use criterion::{Criterion, criterion_group, criterion_main};
use futures::executor::block_on;
use http::HeaderMap;
use micro_bridge::body::{ResolveOptions, ResponseBody, resolve};
use micro_bridge::connection::{Connection, ConnectionRegistry, ResponseWriter};
use micro_bridge::engine::Socket;
use micro_bridge::engine::mock::MockSocket;
use micro_bridge::protocol::Response;
use serde_json::json;

fn bench_resolve_text(c: &mut Criterion) {
    let options = ResolveOptions::default();

    c.bench_function("resolve_text_body", |b| {
        b.iter(|| {
            let mut headers = HeaderMap::new();
            black_box(block_on(resolve(ResponseBody::from("Hello World!"), &mut headers, &options)).unwrap());
        });
    });
}

fn bench_resolve_json(c: &mut Criterion) {
    let options = ResolveOptions::default();
    let value = json!({ "id": 42, "name": "lamp", "tags": ["a", "b", "c"] });

    c.bench_function("resolve_json_body", |b| {
        b.iter(|| {
            let mut headers = HeaderMap::new();
            black_box(block_on(resolve(ResponseBody::Json(value.clone()), &mut headers, &options)).unwrap());
        });
    });
}

fn bench_write_buffer(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
    let payload = Bytes::from(vec![b'x'; 16 * 1024]);

    c.bench_function("write_buffered_response", |b| {
        b.to_async(&runtime).iter(|| {
            let payload = payload.clone();
            async move {
                let registry = Arc::new(ConnectionRegistry::new());
                let connection = Connection::new(MockSocket::new() as Arc<dyn Socket>);
                registry.add(Arc::clone(&connection));
                let writer = ResponseWriter::new(registry, ResolveOptions::default());
                writer.write(&connection, Response::new(payload)).await.unwrap();
                black_box(connection);
            }
        });
    });
}

criterion_group!(benches, bench_resolve_text, bench_resolve_json, bench_write_buffer);
criterion_main!(benches);
