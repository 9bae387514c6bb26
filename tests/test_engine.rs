//! End-to-end engine tests against local stub servers

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use courier::config::Config;
use courier::engine::Engine;
use courier::error::Error;
use courier::http::ClientRequest;
use courier::http::handler::{ClientHandler, FetchHandler, HandlerIo, RequestOutcome};
use courier::http::request::{Method, Request};
use courier::http::response::Response;

/// Read one request head off the socket. Requests in these tests carry no
/// body, so the head is the whole request.
async fn read_request_head(stream: &mut TcpStream) -> bool {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return false,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    return true;
                }
            }
        }
    }
}

/// Stub HTTP server. `respond` maps the per-connection request index to
/// the raw bytes written back; the returned counter tracks accepted
/// connections.
async fn spawn_server<F>(respond: F) -> (SocketAddr, Arc<AtomicUsize>)
where
    F: Fn(usize) -> Vec<u8> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&connections);
    let respond = Arc::new(respond);

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            let respond = Arc::clone(&respond);
            tokio::spawn(async move {
                let mut served = 0usize;
                while read_request_head(&mut stream).await {
                    if stream.write_all(&respond(served)).await.is_err() {
                        return;
                    }
                    served += 1;
                }
            });
        }
    });

    (addr, connections)
}

fn ok_response(body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    )
    .into_bytes()
}

fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.connection_timeout = 5;
    cfg
}

async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

/// Handler that records the order its request ended in.
struct OrderProbe {
    index: usize,
    order: Arc<Mutex<Vec<usize>>>,
    done: Option<oneshot::Sender<RequestOutcome>>,
}

impl OrderProbe {
    fn new(
        index: usize,
        order: Arc<Mutex<Vec<usize>>>,
    ) -> (Self, oneshot::Receiver<RequestOutcome>) {
        let (tx, rx) = oneshot::channel();
        (Self { index, order, done: Some(tx) }, rx)
    }
}

impl ClientHandler for OrderProbe {
    fn populate_request(&mut self, _request: &mut Request) -> bool {
        true
    }

    fn handle_response(&mut self, _response: &Response) -> bool {
        true
    }

    fn read_response_body(&mut self, chunk: &[u8]) -> HandlerIo {
        HandlerIo::Count(chunk.len())
    }

    fn end_request(&mut self, outcome: RequestOutcome) -> bool {
        self.order.lock().unwrap().push(self.index);
        if let Some(done) = self.done.take() {
            let _ = done.send(outcome);
        }
        true
    }
}

fn get_request(addr: SocketAddr, handler: Box<dyn ClientHandler>) -> ClientRequest {
    let url = url::Url::parse(&format!("http://{addr}/")).unwrap();
    ClientRequest::new(Method::GET, url, handler)
}

#[tokio::test]
async fn test_fetch_basic() {
    let (addr, _) = spawn_server(|_| ok_response("hello")).await;
    let engine = Engine::start(test_config()).await.unwrap();

    let result = engine.fetch(Method::GET, &format!("http://{addr}/")).await.unwrap();
    assert_eq!(result.response.status, 200);
    assert_eq!(result.body, b"hello");

    engine.shutdown();
}

#[tokio::test]
async fn test_keepalive_reuses_connection() {
    let (addr, connections) = spawn_server(|_| ok_response("x")).await;
    let engine = Engine::start(test_config()).await.unwrap();
    let url = format!("http://{addr}/");

    engine.fetch(Method::GET, &url).await.unwrap();
    // The connection is parked after the fetch resolves; wait for it.
    wait_until("connection parked idle", || {
        engine.idle_connections("127.0.0.1", addr.port()) == 1
    })
    .await;

    engine.fetch(Method::GET, &url).await.unwrap();
    assert_eq!(connections.load(Ordering::SeqCst), 1, "second fetch must reuse");

    engine.shutdown();
}

#[tokio::test]
async fn test_request_cap_retires_connection() {
    let (addr, connections) = spawn_server(|_| ok_response("x")).await;
    let mut cfg = test_config();
    cfg.max_requests_per_connection = 1;
    let engine = Engine::start(cfg).await.unwrap();
    let url = format!("http://{addr}/");

    engine.fetch(Method::GET, &url).await.unwrap();
    wait_until("connection parked idle", || {
        engine.idle_connections("127.0.0.1", addr.port()) == 1
    })
    .await;

    // The parked connection is at its request cap: the claim must close it
    // and open a fresh one instead of handing it out again.
    engine.fetch(Method::GET, &url).await.unwrap();
    assert_eq!(connections.load(Ordering::SeqCst), 2);

    engine.shutdown();
}

#[tokio::test]
async fn test_pool_exhaustion_is_reported() {
    // A slow server keeps the first request in flight while the second
    // submission runs.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                while read_request_head(&mut stream).await {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    if stream.write_all(&ok_response("slow")).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    let mut cfg = test_config();
    cfg.client_connections = 1;
    let engine = Arc::new(Engine::start(cfg).await.unwrap());
    let url = format!("http://{addr}/");

    // Occupy the only slot.
    let first = {
        let engine = Arc::clone(&engine);
        let url = url.clone();
        tokio::spawn(async move { engine.fetch(Method::GET, &url).await })
    };
    wait_until("slot occupied", || engine.available_slots() == 0).await;

    let (handler, _rx) = FetchHandler::new(None, Vec::new());
    let err = engine
        .submit_request(get_request(addr, Box::new(handler)))
        .unwrap_err();
    assert!(matches!(err, Error::PoolExhausted));

    first.await.unwrap().unwrap();
    engine.shutdown();
}

#[tokio::test]
async fn test_three_requests_two_slots_use_two_connections() {
    // Slow responses force the two concurrent requests onto separate
    // connections; the third reuses a parked one.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&connections);
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                while read_request_head(&mut stream).await {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    if stream.write_all(&ok_response("x")).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    let mut cfg = test_config();
    cfg.client_connections = 2;
    let engine = Arc::new(Engine::start(cfg).await.unwrap());
    let url = format!("http://{addr}/");

    let mut in_flight = Vec::new();
    for _ in 0..2 {
        let engine = Arc::clone(&engine);
        let url = url.clone();
        in_flight.push(tokio::spawn(async move { engine.fetch(Method::GET, &url).await }));
    }
    for task in in_flight {
        task.await.unwrap().unwrap();
    }
    wait_until("a connection parked idle", || {
        engine.idle_connections("127.0.0.1", addr.port()) >= 1
    })
    .await;

    engine.fetch(Method::GET, &url).await.unwrap();
    assert_eq!(connections.load(Ordering::SeqCst), 2);

    engine.shutdown();
}

#[tokio::test]
async fn test_connect_failure_fails_request() {
    // Bind and immediately drop to get a port nothing listens on.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let engine = Engine::start(test_config()).await.unwrap();
    let capacity = engine.available_slots();

    let result = engine.fetch(Method::GET, &format!("http://{addr}/")).await;
    assert!(result.is_err(), "request must fail, not hang");

    // The failed connection's slot goes back to the arena.
    wait_until("slot freed", || engine.available_slots() == capacity).await;
    engine.shutdown();
}

#[tokio::test]
async fn test_tls_to_plain_server_fails_request() {
    // The server speaks plain HTTP and drops the ClientHello, so the
    // handshake can never complete.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
        }
    });

    let engine = Engine::start(test_config()).await.unwrap();
    let capacity = engine.available_slots();

    let result = engine.fetch(Method::GET, &format!("https://{addr}/")).await;
    assert!(result.is_err(), "handshake failure must fail the request");

    wait_until("slot freed", || engine.available_slots() == capacity).await;
    engine.shutdown();
}

#[tokio::test]
async fn test_batch_completes_in_submission_order() {
    let (addr, connections) = spawn_server(|i| ok_response(&format!("body-{i}"))).await;
    let engine = Engine::start(test_config()).await.unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut outcomes = Vec::new();
    let mut batch = Vec::new();
    for i in 0..3 {
        let (probe, rx) = OrderProbe::new(i, Arc::clone(&order));
        outcomes.push(rx);
        batch.push(get_request(addr, Box::new(probe)));
    }
    engine.submit_batch(batch).unwrap();

    for rx in outcomes {
        assert!(matches!(rx.await.unwrap(), RequestOutcome::Complete));
    }
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    assert_eq!(connections.load(Ordering::SeqCst), 1, "one connection serves the batch");

    engine.shutdown();
}

#[tokio::test]
async fn test_framing_error_fails_queued_requests_in_order() {
    // Not an HTTP response head at all.
    let (addr, _) = spawn_server(|_| b"garbage\r\n\r\n".to_vec()).await;
    let engine = Engine::start(test_config()).await.unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut outcomes = Vec::new();
    let mut batch = Vec::new();
    for i in 0..2 {
        let (probe, rx) = OrderProbe::new(i, Arc::clone(&order));
        outcomes.push(rx);
        batch.push(get_request(addr, Box::new(probe)));
    }
    engine.submit_batch(batch).unwrap();

    for rx in outcomes {
        assert!(matches!(rx.await.unwrap(), RequestOutcome::Failed(_)));
    }
    assert_eq!(*order.lock().unwrap(), vec![0, 1]);

    engine.shutdown();
}

#[tokio::test]
async fn test_batch_rejects_mixed_endpoints() {
    let engine = Engine::start(test_config()).await.unwrap();

    let (a, _) = FetchHandler::new(None, Vec::new());
    let (b, _) = FetchHandler::new(None, Vec::new());
    let batch = vec![
        ClientRequest::new(
            Method::GET,
            url::Url::parse("http://127.0.0.1:1000/").unwrap(),
            Box::new(a),
        ),
        ClientRequest::new(
            Method::GET,
            url::Url::parse("http://127.0.0.1:2000/").unwrap(),
            Box::new(b),
        ),
    ];
    assert!(engine.submit_batch(batch).is_err());

    engine.shutdown();
}

#[tokio::test]
async fn test_idle_sweep_closes_expired_connections() {
    let (addr, _) = spawn_server(|_| ok_response("x")).await;
    let mut cfg = test_config();
    cfg.keepalive_timeout = 1;
    let engine = Engine::start(cfg).await.unwrap();
    let capacity = engine.available_slots();

    engine.fetch(Method::GET, &format!("http://{addr}/")).await.unwrap();
    wait_until("connection parked idle", || {
        engine.idle_connections("127.0.0.1", addr.port()) == 1
    })
    .await;

    // Past the keepalive window the sweep claims, closes, and frees it.
    wait_until("idle connection swept", || {
        engine.idle_connections("127.0.0.1", addr.port()) == 0
            && engine.available_slots() == capacity
    })
    .await;

    engine.shutdown();
}

#[tokio::test]
async fn test_eof_delimited_body_closes_connection() {
    // No Content-Length: the body runs until the server closes.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                if read_request_head(&mut stream).await {
                    let _ = stream
                        .write_all(b"HTTP/1.1 200 OK\r\n\r\nstreamed until close")
                        .await;
                }
                // Dropping the stream ends the body.
            });
        }
    });

    let engine = Engine::start(test_config()).await.unwrap();
    let result = engine.fetch(Method::GET, &format!("http://{addr}/")).await.unwrap();
    assert_eq!(result.body, b"streamed until close");

    // An eof-delimited connection is not reusable and never parks.
    assert_eq!(engine.idle_connections("127.0.0.1", addr.port()), 0);
    engine.shutdown();
}

#[tokio::test]
async fn test_access_log_records_responses() {
    let (addr, _) = spawn_server(|_| ok_response("x")).await;
    let log_path = std::env::temp_dir().join(format!("courier-access-{}.log", addr.port()));
    let mut cfg = test_config();
    cfg.access_log = Some(log_path.to_string_lossy().into_owned());
    let engine = Engine::start(cfg).await.unwrap();

    engine.fetch(Method::GET, &format!("http://{addr}/")).await.unwrap();

    // The sink flushes on an interval; give it a moment.
    let mut contents = String::new();
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        contents = std::fs::read_to_string(&log_path).unwrap_or_default();
        if !contents.is_empty() {
            break;
        }
    }
    assert!(contents.contains("GET"), "log line missing: {contents:?}");
    assert!(contents.contains("200"), "log line missing status: {contents:?}");

    engine.shutdown();
    let _ = std::fs::remove_file(&log_path);
}

#[tokio::test]
async fn test_invalid_url_rejected_at_submission() {
    let engine = Engine::start(test_config()).await.unwrap();
    assert!(engine.fetch(Method::GET, "ftp://example.com/").await.is_err());
    assert!(engine.fetch(Method::GET, "not a url").await.is_err());
    engine.shutdown();
}
