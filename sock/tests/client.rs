use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time;

use sock::{
    Client, ConnectionId, CountingSink, LineCodec, RespCodec, RespCommand, RespValue, SockError,
};

/// Accepts connections forever and answers every line with `handler(line)`.
async fn spawn_line_server(handler: fn(&str) -> String) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    tokio::spawn(serve_lines(listener, handler));
    addr
}

async fn serve_lines(listener: TcpListener, handler: fn(&str) -> String) {
    while let Ok((stream, _)) = listener.accept().await {
        tokio::spawn(async move {
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let reply = format!("{}\n", handler(&line));
                if writer.write_all(reply.as_bytes()).await.is_err() {
                    break;
                }
            }
        });
    }
}

fn pong(line: &str) -> String {
    if line == "ping" {
        "pong".to_string()
    } else {
        line.to_string()
    }
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for callback")
        .expect("callback channel closed")
}

#[tokio::test]
async fn ping_receives_pong_on_first_connection() {
    let addr = spawn_line_server(pong).await;
    let (connected_tx, mut connected) = mpsc::unbounded_channel();
    let (read_tx, mut reads) = mpsc::unbounded_channel();

    let mut client = Client::new(addr, LineCodec::new);
    client.on_connect(move |conn| {
        let _ = connected_tx.send(conn.id());
    });
    client.on_read(move |_conn, msg| {
        let _ = read_tx.send((msg.id(), msg.into_body()));
    });

    let conn = client.connect().await.expect("connect");
    assert_eq!(recv(&mut connected).await, ConnectionId::new(1));
    assert!(conn.name().ends_with("-1"));

    conn.send("ping".to_string()).await;
    assert_eq!(recv(&mut reads).await, (ConnectionId::new(1), "pong".to_string()));

    conn.close();
    conn.join().await;
}

#[tokio::test]
async fn sequential_connects_get_increasing_ids() {
    let addr = spawn_line_server(pong).await;
    let client = Client::new(addr, LineCodec::new);

    let first = client.connect().await.expect("first connect");
    first.close();
    first.join().await;

    let second = client.connect().await.expect("second connect");
    assert_eq!(first.id(), ConnectionId::new(1));
    assert_eq!(second.id(), ConnectionId::new(2));
    assert_eq!(client.connections_created(), 2);

    second.close();
    second.join().await;
}

#[tokio::test]
async fn failed_dial_does_not_consume_an_id() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let events = Arc::new(CountingSink::new());
    let mut client = Client::new(addr.to_string(), LineCodec::new);
    client.set_sink(Arc::clone(&events));

    let err = client.connect().await.expect_err("nothing listens");
    assert!(matches!(err, SockError::Dial { .. }));
    assert_eq!(client.connections_created(), 0);
    assert_eq!(events.snapshot().dial_failures, 1);

    let listener = TcpListener::bind(addr).await.expect("rebind");
    tokio::spawn(serve_lines(listener, pong));

    let conn = client.connect().await.expect("connect after failure");
    assert_eq!(conn.id(), ConnectionId::new(1));
    assert_eq!(events.snapshot().established, 1);
    conn.close();
    conn.join().await;
}

#[tokio::test]
async fn callbacks_are_captured_at_connect_time() {
    let addr = spawn_line_server(pong).await;
    let (first_tx, mut first_reads) = mpsc::unbounded_channel();
    let (second_tx, mut second_reads) = mpsc::unbounded_channel();

    let mut client = Client::new(addr, LineCodec::new);
    client.on_read(move |conn, msg| {
        let _ = first_tx.send((conn.id(), msg.into_body()));
    });
    let first = client.connect().await.expect("first connect");

    client.on_read(move |conn, msg| {
        let _ = second_tx.send((conn.id(), msg.into_body()));
    });
    let second = client.connect().await.expect("second connect");

    first.send("alpha".to_string()).await;
    second.send("beta".to_string()).await;

    assert_eq!(recv(&mut first_reads).await, (ConnectionId::new(1), "alpha".to_string()));
    assert_eq!(recv(&mut second_reads).await, (ConnectionId::new(2), "beta".to_string()));

    for conn in [first, second] {
        conn.close();
        conn.join().await;
    }
}

#[tokio::test]
async fn server_hangup_fires_close_callback() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        drop(stream);
    });

    let closes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&closes);
    let mut client = Client::new(addr, LineCodec::new);
    client.on_close(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let conn = client.connect().await.expect("connect");
    time::timeout(Duration::from_secs(2), conn.join())
        .await
        .expect("flows exit after hangup");
    assert!(conn.is_closed());
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn resp_codec_round_trip_against_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let mut buf = [0u8; 64];
        let mut seen = Vec::new();
        while !seen.ends_with(b"PING\r\n") {
            let n = stream.read(&mut buf).await.expect("read");
            if n == 0 {
                return;
            }
            seen.extend_from_slice(&buf[..n]);
        }
        assert_eq!(seen, b"*1\r\n$4\r\nPING\r\n");
        stream.write_all(b"+PONG\r\n").await.expect("write");
        let _ = stream.read(&mut buf).await;
    });

    let (tx, mut replies) = mpsc::unbounded_channel();
    let mut client = Client::new(addr, RespCodec::new);
    client.on_read(move |_conn, msg| {
        let _ = tx.send(msg.into_body());
    });

    let conn = client.connect().await.expect("connect");
    conn.send(RespCommand::new("PING")).await;
    assert_eq!(recv(&mut replies).await, RespValue::Simple(b"PONG".to_vec()));

    conn.close();
    conn.join().await;
}
