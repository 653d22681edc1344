//! End-to-end protocol tests: each spins up a real [`nws_server::run_with_ready`]
//! instance on an OS-assigned loopback port and drives it with plain
//! `tokio::net::TcpStream`s, encoding/decoding frames with the same
//! `nws-wire` primitives the server itself uses (mirrors the teacher's
//! `smb/tests/*.rs`, which drives a real connection rather than mocking
//! the wire).

use std::net::SocketAddr;
use std::time::Duration;

use nws_server::ServerConfig;
use nws_wire::frame::{read_decimal, write_decimal};
use nws_wire::map::{read_map, write_map};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

fn test_config(long_value_threshold: u64) -> ServerConfig {
    ServerConfig {
        bind: "127.0.0.1:0".parse().unwrap(),
        long_value_threshold,
        temp_dir: std::env::temp_dir(),
        verbose: 0,
    }
}

/// Starts a server on an ephemeral port and returns its address. The
/// server task is detached; the process exiting at the end of the test
/// binary is our teardown (same as any other `tokio::spawn`-a-server
/// integration test).
async fn spawn_server() -> SocketAddr {
    spawn_server_with_threshold(4096).await
}

async fn spawn_server_with_threshold(long_value_threshold: u64) -> SocketAddr {
    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(nws_server::run_with_ready(
        test_config(long_value_threshold),
        ready_tx,
    ));
    ready_rx.await.expect("server reports its bound address")
}

async fn connect(addr: SocketAddr) -> TcpStream {
    TcpStream::connect(addr).await.expect("connect to test server")
}

async fn handshake_legacy(s: &mut TcpStream) {
    s.write_all(b"0000").await.unwrap();
    let mut reply = [0u8; 4];
    s.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"2223");
}

/// Modern handshake with no negotiated options beyond cookie-mode long
/// replies (needed by the iterator-cookie test).
async fn handshake_modern(s: &mut TcpStream) {
    s.write_all(b"X000").await.unwrap();
    let mut tok = [0u8; 4];
    s.read_exact(&mut tok).await.unwrap();
    assert_eq!(&tok, b"P000");
    let _advertised = read_map(s).await.unwrap();
    s.write_all(b"R000").await.unwrap();
    write_map(s, &Vec::new()).await.unwrap();
    s.read_exact(&mut tok).await.unwrap();
    assert_eq!(&tok, b"A000");
}

/// Modern handshake that also requests `KillServerOnClose`.
async fn handshake_modern_deadman(s: &mut TcpStream) {
    s.write_all(b"X000").await.unwrap();
    let mut tok = [0u8; 4];
    s.read_exact(&mut tok).await.unwrap();
    assert_eq!(&tok, b"P000");
    let _advertised = read_map(s).await.unwrap();
    s.write_all(b"R000").await.unwrap();
    write_map(
        s,
        &vec![("KillServerOnClose".to_string(), "1".to_string())],
    )
    .await
    .unwrap();
    s.read_exact(&mut tok).await.unwrap();
    assert_eq!(&tok, b"A000");
}

async fn write_arg(s: &mut TcpStream, bytes: &[u8]) {
    write_decimal::<20, _>(s, bytes.len() as u64).await.unwrap();
    s.write_all(bytes).await.unwrap();
}

async fn send_command(s: &mut TcpStream, verb: &str, args: &[&[u8]]) {
    write_decimal::<4, _>(s, (1 + args.len()) as u64).await.unwrap();
    write_arg(s, verb.as_bytes()).await;
    for a in args {
        write_arg(s, a).await;
    }
}

async fn read_short(s: &mut TcpStream) -> u16 {
    let mut status = [0u8; 4];
    s.read_exact(&mut status).await.unwrap();
    std::str::from_utf8(&status).unwrap().parse().unwrap()
}

struct LongReply {
    status: u16,
    type_desc: u64,
    body: Vec<u8>,
    cookie: Option<(u32, u64)>,
}

async fn read_long(s: &mut TcpStream, cookie_mode: bool) -> LongReply {
    let mut status = [0u8; 4];
    s.read_exact(&mut status).await.unwrap();
    let status: u16 = std::str::from_utf8(&status).unwrap().parse().unwrap();
    let type_desc = read_decimal::<20, _>(s).await.unwrap();
    let cookie = if cookie_mode {
        let mut vid = [0u8; 20];
        s.read_exact(&mut vid).await.unwrap();
        let vid: u32 = std::str::from_utf8(&vid).unwrap().trim().parse().unwrap();
        let index = read_decimal::<20, _>(s).await.unwrap();
        Some((vid, index))
    } else {
        None
    };
    let len = read_decimal::<20, _>(s).await.unwrap() as usize;
    let mut body = vec![0u8; len];
    s.read_exact(&mut body).await.unwrap();
    LongReply {
        status,
        type_desc,
        body,
        cookie,
    }
}

/// Polls `list vars` until the named variable reports at least
/// `fetchers` parked fetchers or `finders` parked finders, so tests never
/// need a sleep-and-hope race between "park" and "store"/"find".
async fn wait_until_waiters(s: &mut TcpStream, ws: &str, var: &str, fetchers: usize, finders: usize) {
    for _ in 0..200 {
        send_command(s, "list vars", &[ws.as_bytes()]).await;
        let reply = read_long(s, false).await;
        assert_eq!(reply.status, 0);
        let text = String::from_utf8(reply.body).unwrap();
        for line in text.lines() {
            let cols: Vec<&str> = line.split('\t').collect();
            if cols.first() == Some(&var) {
                let f: usize = cols[2].parse().unwrap();
                let n: usize = cols[3].parse().unwrap();
                if f >= fetchers && n >= finders {
                    return;
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {var} to show {fetchers} fetchers / {finders} finders");
}

#[tokio::test]
async fn fifo_store_then_fetch_round_trips() {
    let addr = spawn_server().await;
    let mut c = connect(addr).await;
    handshake_legacy(&mut c).await;

    send_command(&mut c, "open ws", &[b"w1", b"me", b"no", b"yes"]).await;
    assert_eq!(read_short(&mut c).await, 0);

    send_command(&mut c, "declare var", &[b"w1", b"v", b"fifo"]).await;
    assert_eq!(read_short(&mut c).await, 0);

    send_command(&mut c, "store", &[b"w1", b"v", b"1", b"hello"]).await;
    assert_eq!(read_short(&mut c).await, 0);

    send_command(&mut c, "fetch", &[b"w1", b"v"]).await;
    let reply = read_long(&mut c, false).await;
    assert_eq!(reply.status, 0);
    assert_eq!(reply.type_desc, 1);
    assert_eq!(reply.body, b"hello");

    // Fetching again on an empty FIFO without blocking is a user error,
    // not a hang (spec.md section 4.C: "park if blocking else fail").
    send_command(&mut c, "fetchTry", &[b"w1", b"v"]).await;
    let empty = read_long(&mut c, false).await;
    assert_ne!(empty.status, 0);
}

#[tokio::test]
async fn blocking_fetch_is_served_by_a_later_store() {
    let addr = spawn_server().await;

    let mut owner = connect(addr).await;
    handshake_legacy(&mut owner).await;
    send_command(&mut owner, "open ws", &[b"w2", b"owner", b"no", b"yes"]).await;
    assert_eq!(read_short(&mut owner).await, 0);
    send_command(&mut owner, "declare var", &[b"w2", b"v", b"fifo"]).await;
    assert_eq!(read_short(&mut owner).await, 0);

    let mut fetcher = connect(addr).await;
    handshake_legacy(&mut fetcher).await;
    send_command(&mut fetcher, "use ws", &[b"w2", b"", b"no", b"no"]).await;
    assert_eq!(read_short(&mut fetcher).await, 0);

    let fetch_task = tokio::spawn(async move {
        send_command(&mut fetcher, "fetch", &[b"w2", b"v"]).await;
        let reply = read_long(&mut fetcher, false).await;
        (reply.status, reply.body)
    });

    wait_until_waiters(&mut owner, "w2", "v", 1, 0).await;

    send_command(&mut owner, "store", &[b"w2", b"v", b"1", b"x"]).await;
    assert_eq!(read_short(&mut owner).await, 0);

    let (status, body) = timeout(Duration::from_secs(5), fetch_task)
        .await
        .expect("fetch task completes")
        .expect("fetch task did not panic");
    assert_eq!(status, 0);
    assert_eq!(body, b"x");
}

#[tokio::test]
async fn stale_iterator_cookie_after_delete_and_recreate_is_rejected() {
    let addr = spawn_server().await;
    let mut c = connect(addr).await;
    handshake_modern(&mut c).await;

    send_command(&mut c, "open ws", &[b"w3", b"me", b"no", b"yes"]).await;
    assert_eq!(read_short(&mut c).await, 0);
    send_command(&mut c, "declare var", &[b"w3", b"v", b"fifo"]).await;
    assert_eq!(read_short(&mut c).await, 0);

    send_command(&mut c, "store", &[b"w3", b"v", b"1", b"a"]).await;
    assert_eq!(read_short(&mut c).await, 0);

    send_command(&mut c, "ifetchTry", &[b"w3", b"v", b"", b""]).await;
    let first = read_long(&mut c, true).await;
    assert_eq!(first.status, 0);
    assert_eq!(first.body, b"a");
    let (old_vid, old_index) = first.cookie.expect("cookie mode returns a cookie");

    send_command(&mut c, "delete var", &[b"w3", b"v"]).await;
    assert_eq!(read_short(&mut c).await, 0);

    send_command(&mut c, "store", &[b"w3", b"v", b"1", b"b"]).await;
    assert_eq!(read_short(&mut c).await, 0);

    let vid_str = format!("{old_vid:020}");
    let index_str = old_index.to_string();
    send_command(
        &mut c,
        "ifetchTry",
        &[b"w3", b"v", vid_str.as_bytes(), index_str.as_bytes()],
    )
    .await;
    let mismatch = read_long(&mut c, true).await;
    assert_ne!(mismatch.status, 0);
    assert_eq!(String::from_utf8(mismatch.body).unwrap(), "");
}

#[tokio::test]
async fn barrier_releases_all_three_members_at_once() {
    let addr = spawn_server().await;

    let mut c1 = connect(addr).await;
    handshake_legacy(&mut c1).await;
    send_command(&mut c1, "open ws", &[b"wb", b"c1", b"no", b"yes"]).await;
    assert_eq!(read_short(&mut c1).await, 0);
    send_command(&mut c1, "declare var", &[b"wb", b"b", b"__barrier"]).await;
    assert_eq!(read_short(&mut c1).await, 0);

    let mut c2 = connect(addr).await;
    handshake_legacy(&mut c2).await;
    send_command(&mut c2, "use ws", &[b"wb", b"", b"no", b"no"]).await;
    assert_eq!(read_short(&mut c2).await, 0);

    let mut c3 = connect(addr).await;
    handshake_legacy(&mut c3).await;
    send_command(&mut c3, "use ws", &[b"wb", b"", b"no", b"no"]).await;
    assert_eq!(read_short(&mut c3).await, 0);

    for c in [&mut c1, &mut c2, &mut c3] {
        send_command(c, "store", &[b"wb", b"b", b"0", b""]).await;
        assert_eq!(read_short(c).await, 0);
    }

    let task1 = tokio::spawn(async move {
        send_command(&mut c1, "find", &[b"wb", b"b"]).await;
        let reply = read_long(&mut c1, false).await;
        (reply.status, reply.body)
    });
    let task2 = tokio::spawn(async move {
        send_command(&mut c2, "find", &[b"wb", b"b"]).await;
        let reply = read_long(&mut c2, false).await;
        (reply.status, reply.body)
    });

    let mut watcher = connect(addr).await;
    handshake_legacy(&mut watcher).await;
    send_command(&mut watcher, "use ws", &[b"wb", b"", b"no", b"no"]).await;
    assert_eq!(read_short(&mut watcher).await, 0);
    wait_until_waiters(&mut watcher, "wb", "b", 0, 2).await;

    send_command(&mut c3, "find", &[b"wb", b"b"]).await;
    let last = read_long(&mut c3, false).await;
    assert_eq!(last.status, 0);
    assert_eq!(last.body, b"3");

    for task in [task1, task2] {
        let (status, body) = timeout(Duration::from_secs(5), task)
            .await
            .expect("find task completes")
            .expect("find task did not panic");
        assert_eq!(status, 0);
        assert_eq!(body, b"3");
    }
}

#[tokio::test]
async fn deadman_shuts_the_server_down_on_disconnect() {
    let addr = spawn_server().await;
    let mut c = connect(addr).await;
    handshake_modern_deadman(&mut c).await;

    send_command(&mut c, "deadman", &[]).await;
    assert_eq!(read_short(&mut c).await, 0);

    drop(c);

    // The server should stop accepting after the deadman connection
    // closes (spec.md section 4.F); a fresh connection attempt eventually
    // fails once the listener is gone.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        if TcpStream::connect(addr).await.is_err() {
            break;
        }
        if std::time::Instant::now() > deadline {
            panic!("server did not shut down after deadman disconnect");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn a_value_above_the_spill_threshold_round_trips_unchanged() {
    // A low threshold forces `store`'s payload through the spill-to-disk
    // path in `nws_wire::tuple::read_counted_long` instead of staying in
    // memory; the client can't observe which path was taken, only that
    // the bytes come back exactly as sent.
    let addr = spawn_server_with_threshold(128).await;
    let mut c = connect(addr).await;
    handshake_legacy(&mut c).await;

    send_command(&mut c, "open ws", &[b"w4", b"me", b"no", b"yes"]).await;
    assert_eq!(read_short(&mut c).await, 0);
    send_command(&mut c, "declare var", &[b"w4", b"v", b"single"]).await;
    assert_eq!(read_short(&mut c).await, 0);

    let big = vec![b'q'; 10_000];
    send_command(&mut c, "store", &[b"w4", b"v", b"7", &big]).await;
    assert_eq!(read_short(&mut c).await, 0);

    send_command(&mut c, "fetch", &[b"w4", b"v"]).await;
    let reply = read_long(&mut c, false).await;
    assert_eq!(reply.status, 0);
    assert_eq!(reply.type_desc, 7);
    assert_eq!(reply.body, big);
}
