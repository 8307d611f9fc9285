use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use minifarm_agent::{Camera, CameraConfig, StreamConfig, StreamHandle, StreamServer};

fn spawn_stream() -> StreamHandle {
    let camera = Camera::open(&CameraConfig {
        device: "stub://stream-test".to_string(),
        width: 160,
        height: 120,
    })
    .expect("stub camera");
    StreamServer::new(
        camera,
        StreamConfig {
            addr: "127.0.0.1:0".to_string(),
            width: 80,
            height: 60,
            fps: 25,
            jpeg_quality: 60,
        },
    )
    .spawn()
    .expect("spawn stream server")
}

fn open_stream(addr: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    write!(stream, "GET /stream.mjpg HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();
    stream
}

fn count(haystack: &[u8], needle: &[u8]) -> usize {
    haystack.windows(needle.len()).filter(|w| *w == needle).count()
}

/// Read until at least `parts` multipart boundaries have arrived.
fn read_parts(stream: &mut TcpStream, parts: usize) -> Vec<u8> {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut data = Vec::new();
    let mut buf = [0u8; 8192];
    while count(&data, b"--FRAME\r\n") < parts {
        assert!(Instant::now() < deadline, "timed out waiting for frames");
        let n = stream.read(&mut buf).expect("read stream");
        assert!(n > 0, "stream closed early");
        data.extend_from_slice(&buf[..n]);
    }
    data
}

#[test]
fn stream_response_is_multipart_jpeg() {
    let handle = spawn_stream();
    let mut client = open_stream(handle.addr);
    let data = read_parts(&mut client, 2);
    let text = String::from_utf8_lossy(&data);
    assert!(text.starts_with("HTTP/1.1 200 OK"));
    assert!(text.contains("Content-Type: multipart/x-mixed-replace; boundary=FRAME"));
    assert!(text.contains("Cache-Control: no-cache, private"));
    assert!(text.contains("Pragma: no-cache"));
    assert!(text.contains("Age: 0"));
    assert!(text.contains("Content-Type: image/jpeg"));
    // JPEG start-of-image marker follows the part headers.
    assert!(count(&data, &[0xFF, 0xD8, 0xFF]) >= 1);
    drop(client);
    handle.stop().unwrap();
}

#[test]
fn dropping_one_client_keeps_the_other_streaming() {
    let handle = spawn_stream();
    let mut first = open_stream(handle.addr);
    let mut second = open_stream(handle.addr);
    read_parts(&mut first, 1);
    read_parts(&mut second, 1);

    drop(first);
    // The server notices the dead socket on its next write.
    let more = read_parts(&mut second, 5);
    assert!(count(&more, b"--FRAME\r\n") >= 5);

    let deadline = Instant::now() + Duration::from_secs(10);
    while handle.active_clients() > 1 {
        assert!(Instant::now() < deadline, "dropped client never released");
        read_parts(&mut second, 1);
    }
    assert_eq!(handle.active_clients(), 1);
    assert!(handle.frames_published() > 0);

    drop(second);
    handle.stop().unwrap();
}
