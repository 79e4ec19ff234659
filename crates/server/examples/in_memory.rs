//! Runs the server against the in-memory engine and plays a few exchanges by hand.
//!
//! `cargo run -p micro-server --example in_memory`

use std::sync::Arc;
use std::time::Duration;

use micro_bridge::engine::RequestMeta;
use micro_bridge::engine::mock::{MockEngine, MockSocket};
use micro_bridge::protocol::{BoxError, Request, Response};
use micro_server::{Server, ServerConfig, ShutdownHook, StatusError, make_handler};
use serde_json::json;
use tracing::{Level, info};

async fn route(request: Request) -> Result<Response, BoxError> {
    match request.path() {
        "/" => Ok(Response::new("hello world")),
        "/json" => Ok(Response::json(&json!({ "path": request.path(), "query": request.query() }))?),
        "/echo" => {
            let body = request.body().ok_or_else(|| StatusError::bad_request("send a body"))?;
            Ok(Response::stream(body.into_byte_stream()))
        }
        other => Err(StatusError::not_found(format!("nothing at {other}")).into()),
    }
}

async fn settle(server: &Server) {
    while server.connections() > 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

fn report(name: &str, socket: &MockSocket) {
    info!(
        exchange = name,
        status = %socket.status().unwrap_or_default(),
        body = %String::from_utf8_lossy(&socket.received()),
        "response"
    );
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    micro_server::init_tracing(Level::INFO)?;

    let engine = MockEngine::new();
    let server = Server::builder()
        .engine(Arc::clone(&engine))
        .config(ServerConfig::default().with_port(3000).with_drain_timeout(Duration::from_secs(1)))
        .handler(make_handler(route))
        .shutdown_handler(ShutdownHook::callback(|server: Server| async move {
            info!(connections = server.connections(), "flushing before drain");
            Ok::<_, BoxError>(())
        }))
        .build()?;

    server.listen()?;

    let exchanges = [
        ("hello", RequestMeta::new("GET", "/").header("host", "localhost:3000"), None),
        ("json", RequestMeta::new("GET", "/json").query("debug=1"), None),
        ("echo", RequestMeta::new("POST", "/echo"), Some(&b"echo me"[..])),
        ("missing", RequestMeta::new("GET", "/nope"), None),
    ];

    for (name, meta, body) in exchanges {
        let Some(socket) = engine.connect(meta) else {
            break;
        };
        if let Some(body) = body {
            socket.push_data(body, true);
        }
        settle(&server).await;
        report(name, &socket);
    }

    let outcome = server.close().await;
    info!(?outcome, "server closed");
    Ok(())
}
