use hello_core::{Responder, Server, ServerConfig};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

async fn start() -> (SocketAddr, oneshot::Sender<()>, tokio::task::JoinHandle<bool>) {
    let config = ServerConfig::new()
        .hostname("127.0.0.1")
        .port(0)
        .shutdown_timeout(Duration::from_secs(2));
    let server = Server::bind(Responder::new(), &config).await.unwrap();
    let addr = server.local_addr().unwrap();

    let (tx, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        server
            .serve(async move {
                let _ = rx.await;
            })
            .await
            .unwrap()
    });

    (addr, tx, handle)
}

/// Write `request` verbatim and read until the server closes the connection
async fn raw_exchange(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();

    let read = async {
        let mut received = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => received.extend_from_slice(&buf[..n]),
            }
        }
        received
    };
    let received = tokio::time::timeout(Duration::from_secs(5), read)
        .await
        .expect("no response within 5s");
    String::from_utf8_lossy(&received).into_owned()
}

async fn raw_request(addr: SocketAddr, request_line: &str) -> String {
    let request = format!("{request_line}\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    raw_exchange(addr, request.as_bytes()).await
}

#[tokio::test]
async fn serves_hello_world_over_tcp() {
    let (addr, shutdown, handle) = start().await;

    let response = raw_request(addr, "GET / HTTP/1.1").await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.ends_with("\r\n\r\nhello world"), "{response}");

    let response = raw_request(addr, "GET /missing HTTP/1.1").await;
    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"), "{response}");
    assert!(!response.ends_with("hello world"), "{response}");

    shutdown.send(()).unwrap();
    assert!(handle.await.unwrap());
}

#[tokio::test]
async fn shutdown_closes_idle_keep_alive_connections() {
    let (addr, shutdown, handle) = start().await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();

    let mut received = Vec::new();
    let mut buf = [0u8; 1024];
    while !received.ends_with(b"hello world") {
        let n = stream.read(&mut buf).await.unwrap();
        assert_ne!(n, 0, "connection closed before the response completed");
        received.extend_from_slice(&buf[..n]);
    }

    shutdown.send(()).unwrap();
    let drained = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server did not stop")
        .unwrap();
    assert!(drained);

    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn unknown_method_is_not_found() {
    let (addr, shutdown, handle) = start().await;

    let response = raw_request(addr, "PURGE / HTTP/1.1").await;
    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"), "{response}");
    assert!(response.ends_with("\r\n\r\nNot Found"), "{response}");

    shutdown.send(()).unwrap();
    assert!(handle.await.unwrap());
}

#[tokio::test]
async fn non_ascii_header_value_still_gets_hello_world() {
    let (addr, shutdown, handle) = start().await;

    let response = raw_exchange(
        addr,
        b"GET / HTTP/1.1\r\nHost: localhost\r\nX-A: caf\xc3\xa9\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.ends_with("\r\n\r\nhello world"), "{response}");

    shutdown.send(()).unwrap();
    assert!(handle.await.unwrap());
}

#[tokio::test]
async fn oversized_declared_body_is_rejected_without_reading_it() {
    let (addr, shutdown, handle) = start().await;

    let response = raw_exchange(
        addr,
        b"POST /missing HTTP/1.1\r\nHost: localhost\r\nContent-Length: 1000000000\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 413 Payload Too Large\r\n"), "{response}");

    shutdown.send(()).unwrap();
    assert!(handle.await.unwrap());
}
