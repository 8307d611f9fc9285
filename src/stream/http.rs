use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use anyhow::{anyhow, Result};

const MAX_HEAD_BYTES: u64 = 8192;
const READ_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub(crate) struct HttpRequest {
    pub method: String,
    pub path: String,
}

/// Method and path from the request line. Headers are read and discarded so
/// closing the socket does not reset the response.
pub(crate) fn read_request(stream: &TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let mut head = BufReader::new(stream.take(MAX_HEAD_BYTES));

    let mut line = String::new();
    if head.read_line(&mut line)? == 0 {
        return Err(anyhow!("empty request"));
    }
    let mut fields = line.split_whitespace();
    let (Some(method), Some(target)) = (fields.next(), fields.next()) else {
        return Err(anyhow!("malformed request line {:?}", line.trim_end()));
    };
    let path = target.split_once('?').map_or(target, |(path, _)| path);
    let request = HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
    };

    let mut header = String::new();
    while head.read_line(&mut header)? > 0 && !header.trim_end().is_empty() {
        header.clear();
    }
    Ok(request)
}

fn status_line(status: u16) -> &'static str {
    match status {
        200 => "HTTP/1.1 200 OK",
        301 => "HTTP/1.1 301 Moved Permanently",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    }
}

pub(crate) fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    extra_headers: &[(&str, &str)],
    body: &[u8],
) -> Result<()> {
    let mut header = format!(
        "{}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        status_line(status),
        content_type,
        body.len()
    );
    for (name, value) in extra_headers {
        header.push_str(&format!("{}: {}\r\n", name, value));
    }
    header.push_str("\r\n");
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

pub(crate) fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", &[], body.as_bytes())
}

pub(crate) const BOUNDARY: &str = "FRAME";

pub(crate) fn write_stream_header(stream: &mut TcpStream) -> Result<()> {
    let header = format!(
        "HTTP/1.1 200 OK\r\n\
         Age: 0\r\n\
         Cache-Control: no-cache, private\r\n\
         Pragma: no-cache\r\n\
         Connection: close\r\n\
         Content-Type: multipart/x-mixed-replace; boundary={}\r\n\r\n",
        BOUNDARY
    );
    stream.write_all(header.as_bytes())?;
    Ok(())
}

pub(crate) fn write_stream_part(stream: &mut TcpStream, jpeg: &[u8]) -> Result<()> {
    let part = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        jpeg.len()
    );
    stream.write_all(part.as_bytes())?;
    stream.write_all(jpeg)?;
    stream.write_all(b"\r\n")?;
    stream.flush()?;
    Ok(())
}
