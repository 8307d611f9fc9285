//! Live MJPEG preview.
//!
//! A pump thread captures from the shared camera, downscales, encodes and
//! publishes into a `FrameHub`. The accept thread hands each connection to its
//! own handler thread; a stream client lives until its socket fails or the
//! server stops.

mod http;
mod hub;

pub use hub::{FrameHub, NextFrame, StreamFrame};

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use crate::camera::Camera;
use http::{
    read_request, write_json_response, write_response, write_stream_header, write_stream_part,
};

const CLIENT_POLL: Duration = Duration::from_millis(500);
const CLIENT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct StreamConfig {
    pub addr: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub jpeg_quality: u8,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:5000".to_string(),
            width: 640,
            height: 480,
            fps: 10,
            jpeg_quality: 80,
        }
    }
}

struct Shared {
    hub: FrameHub,
    shutdown: AtomicBool,
    clients: AtomicUsize,
    camera: String,
    config: StreamConfig,
}

#[derive(Debug)]
pub struct StreamHandle {
    pub addr: SocketAddr,
    shared: Arc<Shared>,
    joins: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("camera", &self.camera)
            .field("clients", &self.clients.load(Ordering::SeqCst))
            .finish()
    }
}

impl StreamHandle {
    pub fn active_clients(&self) -> usize {
        self.shared.clients.load(Ordering::SeqCst)
    }

    pub fn frames_published(&self) -> u64 {
        self.shared.hub.published()
    }

    /// Stop the pump and accept threads. Client threads notice within one poll.
    pub fn stop(mut self) -> Result<()> {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.hub.close();
        for join in self.joins.drain(..) {
            join.join()
                .map_err(|_| anyhow!("stream server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct StreamServer {
    camera: Camera,
    config: StreamConfig,
}

impl StreamServer {
    pub fn new(camera: Camera, config: StreamConfig) -> Self {
        Self { camera, config }
    }

    pub fn spawn(self) -> Result<StreamHandle> {
        if self.config.width == 0 || self.config.height == 0 {
            return Err(anyhow!("stream resolution must be non-zero"));
        }
        let listener = TcpListener::bind(&self.config.addr)
            .with_context(|| format!("bind stream server on {}", self.config.addr))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shared = Arc::new(Shared {
            hub: FrameHub::new(),
            shutdown: AtomicBool::new(false),
            clients: AtomicUsize::new(0),
            camera: self.camera.describe().to_string(),
            config: self.config,
        });

        let pump_shared = shared.clone();
        let camera = self.camera;
        let pump = std::thread::spawn(move || run_pump(camera, pump_shared));

        let accept_shared = shared.clone();
        let accept = std::thread::spawn(move || {
            if let Err(err) = run_accept(listener, accept_shared) {
                log::error!("stream server stopped: {}", err);
            }
        });

        log::info!(
            "stream server listening on http://{} ({}x{} @ {} fps)",
            addr,
            shared.config.width,
            shared.config.height,
            shared.config.fps
        );
        Ok(StreamHandle {
            addr,
            shared,
            joins: vec![pump, accept],
        })
    }
}

fn run_pump(camera: Camera, shared: Arc<Shared>) {
    let period = Duration::from_secs(1) / shared.config.fps.max(1);
    let (width, height) = (shared.config.width, shared.config.height);
    while !shared.shutdown.load(Ordering::SeqCst) {
        let started = Instant::now();
        let encoded = camera
            .capture()
            .and_then(|frame| frame.downscale(width, height).encode_jpeg(shared.config.jpeg_quality));
        match encoded {
            Ok(jpeg) => {
                shared.hub.publish(jpeg);
            }
            Err(err) => log::warn!("stream capture failed: {:#}", err),
        }
        if let Some(rest) = period.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }
    log::debug!("stream pump stopped");
}

fn run_accept(listener: TcpListener, shared: Arc<Shared>) -> Result<()> {
    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let client_shared = shared.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &client_shared) {
                        log::warn!("stream client {} dropped: {:#}", peer, err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, shared: &Shared) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_write_timeout(Some(CLIENT_WRITE_TIMEOUT))?;
    let request = read_request(&stream)?;
    if request.method != "GET" {
        return write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#);
    }
    match request.path.as_str() {
        "/" => write_response(
            &mut stream,
            301,
            "text/plain",
            &[("Location", "/index.html")],
            b"",
        ),
        "/index.html" => {
            let page = index_page(&shared.config);
            write_response(&mut stream, 200, "text/html", &[], page.as_bytes())
        }
        "/health" => {
            let body = serde_json::json!({
                "status": "ok",
                "camera": shared.camera,
                "frames_published": shared.hub.published(),
                "clients": shared.clients.load(Ordering::SeqCst),
            });
            write_json_response(&mut stream, 200, &body.to_string())
        }
        "/stream.mjpg" => {
            shared.clients.fetch_add(1, Ordering::SeqCst);
            let result = serve_stream(&mut stream, shared);
            shared.clients.fetch_sub(1, Ordering::SeqCst);
            result
        }
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

fn serve_stream(stream: &mut TcpStream, shared: &Shared) -> Result<()> {
    write_stream_header(stream)?;
    log::debug!("stream client connected");
    let mut last = 0;
    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            return Ok(());
        }
        match shared.hub.wait_next(last, CLIENT_POLL) {
            NextFrame::Frame(frame) => {
                write_stream_part(stream, &frame.jpeg)?;
                last = frame.sequence;
            }
            NextFrame::Timeout => continue,
            NextFrame::Closed => return Ok(()),
        }
    }
}

fn index_page(config: &StreamConfig) -> String {
    format!(
        "<html>\n<head><title>MiniFarm camera</title></head>\n<body>\n\
         <h1>MiniFarm camera</h1>\n\
         <img src=\"stream.mjpg\" width=\"{}\" height=\"{}\" />\n\
         </body>\n</html>\n",
        config.width, config.height
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraConfig;
    use std::io::{Read, Write};

    fn spawn_server() -> StreamHandle {
        let camera = Camera::open(&CameraConfig {
            device: "stub://test".to_string(),
            width: 64,
            height: 48,
        })
        .unwrap();
        StreamServer::new(
            camera,
            StreamConfig {
                addr: "127.0.0.1:0".to_string(),
                width: 32,
                height: 24,
                fps: 20,
                jpeg_quality: 70,
            },
        )
        .spawn()
        .unwrap()
    }

    fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        write!(stream, "GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path).unwrap();
        let mut out = String::new();
        stream.read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn root_redirects_to_index() {
        let handle = spawn_server();
        let response = get(handle.addr, "/");
        assert!(response.starts_with("HTTP/1.1 301"));
        assert!(response.contains("Location: /index.html"));
        let page = get(handle.addr, "/index.html");
        assert!(page.starts_with("HTTP/1.1 200"));
        assert!(page.contains("stream.mjpg"));
        handle.stop().unwrap();
    }

    #[test]
    fn unknown_path_is_404() {
        let handle = spawn_server();
        assert!(get(handle.addr, "/nope").starts_with("HTTP/1.1 404"));
        handle.stop().unwrap();
    }

    #[test]
    fn query_string_is_ignored_and_only_get_is_served() {
        let handle = spawn_server();
        assert!(get(handle.addr, "/health?t=1").starts_with("HTTP/1.1 200"));

        let mut stream = TcpStream::connect(handle.addr).unwrap();
        write!(
            stream,
            "POST /health HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\n\r\n"
        )
        .unwrap();
        let mut out = String::new();
        stream.read_to_string(&mut out).unwrap();
        assert!(out.starts_with("HTTP/1.1 405"));
        handle.stop().unwrap();
    }

    #[test]
    fn health_reports_camera() {
        let handle = spawn_server();
        let response = get(handle.addr, "/health");
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("\"status\":\"ok\""));
        assert!(response.contains("stub://test"));
        handle.stop().unwrap();
    }

    #[test]
    fn rejects_zero_resolution() {
        let camera = Camera::open(&CameraConfig::default()).unwrap();
        let config = StreamConfig {
            addr: "127.0.0.1:0".to_string(),
            width: 0,
            ..StreamConfig::default()
        };
        assert!(StreamServer::new(camera, config).spawn().is_err());
    }
}
