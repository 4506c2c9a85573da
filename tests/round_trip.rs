//! End to end over real sockets: client → cache → origin, with a remote
//! blob store behind the persister.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use url::Url;

use emergency_cache::cache::store::encode_key;
use emergency_cache::cache::{
    CachedResponse, EmergencyCache, Persister, PersisterConfig, ShutdownMode, open_store,
};
use emergency_cache::config::CacheConfig;
use emergency_cache::http::{Method, Request, Response, StatusCode};
use emergency_cache::middleware::{Logger, handler_fn};
use emergency_cache::proxy::Upstream;
use emergency_cache::server::Server;

type Blobs = Arc<Mutex<HashMap<String, Vec<u8>>>>;

/// Starts an in-memory blob store speaking GET/PUT.
async fn spawn_blob_store() -> (String, Blobs) {
    let blobs: Blobs = Arc::default();
    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr();

    let shared = blobs.clone();
    tokio::spawn(server.run(handler_fn(move |req: Request| {
        let blobs = shared.clone();
        async move {
            let mut blobs = blobs.lock().unwrap();
            match req.method() {
                Method::Put => {
                    blobs.insert(req.path().to_owned(), req.body().to_vec());
                    Response::new(StatusCode::CREATED)
                }
                Method::Get => match blobs.get(req.path()) {
                    Some(blob) => Response::new(StatusCode::OK).body_bytes(blob.clone()),
                    None => Response::new(StatusCode::NOT_FOUND),
                },
                _ => Response::new(StatusCode::METHOD_NOT_ALLOWED),
            }
        }
    })));

    (format!("http://{addr}/cache"), blobs)
}

/// Starts an origin that marks every response cacheable.
async fn spawn_origin() -> Url {
    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr();
    tokio::spawn(server.run(handler_fn(|req: Request| async move {
        Response::new(StatusCode::OK)
            .header("Content-Type", "text/plain")
            .header("X-Emergency-Cacheable", "true")
            .body(format!("origin saw {}", req.target()))
    })));
    Url::parse(&format!("http://{addr}")).unwrap()
}

/// An origin address with nothing listening.
fn dead_origin() -> Url {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    Url::parse(&format!("http://{addr}")).unwrap()
}

async fn spawn_cache(config: CacheConfig, origin: Url) -> (Url, Persister) {
    let store = open_store(&config.path).unwrap();
    let persister = Persister::spawn(store.clone(), config.persister);
    let handler = Logger::new(EmergencyCache::new(
        config,
        store,
        persister.handle(),
        Upstream::with_timeout(origin, Duration::from_secs(2)).unwrap(),
    ));

    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr();
    tokio::spawn(server.run(handler));
    (Url::parse(&format!("http://{addr}")).unwrap(), persister)
}

struct Fetched {
    status: u16,
    content_type: Option<String>,
    body: Vec<u8>,
}

async fn fetch(base: &Url, target: &str) -> Fetched {
    let response = reqwest::Client::new()
        .get(base.join(target).unwrap())
        .header("Host", "site.example")
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let body = response.bytes().await.unwrap().to_vec();
    Fetched {
        status,
        content_type,
        body,
    }
}

async fn wait_for_blob(blobs: &Blobs, path: &str) -> Vec<u8> {
    for _ in 0..100 {
        if let Some(blob) = blobs.lock().unwrap().get(path).cloned() {
            return blob;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("no entry written to {path}");
}

#[tokio::test]
async fn caches_while_healthy_and_replays_when_origin_is_down() {
    let (store_path, blobs) = spawn_blob_store().await;
    let origin = spawn_origin().await;

    // Normal mode: origin answers, the response lands in the blob store.
    let config = CacheConfig {
        path: store_path.clone(),
        ..CacheConfig::default()
    };
    let (cache, persister) = spawn_cache(config, origin).await;

    let response = fetch(&cache, "/page?id=7").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body, b"origin saw /page?id=7");

    // The write is queued after the client already has its response.
    let blob_path = format!("/cache/{}", encode_key("site.example/page?id=7"));
    let payload = wait_for_blob(&blobs, &blob_path).await;
    let stats = persister.shutdown(ShutdownMode::Drain).await;
    assert_eq!(stats.written, 1);

    let entry = CachedResponse::decode(&payload).unwrap();
    assert_eq!(entry.status, 200);
    assert_eq!(entry.body.as_ref(), b"origin saw /page?id=7");

    // Emergency mode against a dead origin: stored pages still answer.
    let config = CacheConfig {
        path: store_path,
        emergency_mode: true,
        ..CacheConfig::default()
    };
    let (cache, persister) = spawn_cache(config, dead_origin()).await;

    let response = fetch(&cache, "/page?id=7").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.content_type.as_deref(), Some("text/plain"));
    assert_eq!(response.body, b"origin saw /page?id=7");

    let response = fetch(&cache, "/missing").await;
    assert_eq!(response.status, 502);

    let stats = persister.shutdown(ShutdownMode::Drain).await;
    assert_eq!(stats.submitted, 0);
}
