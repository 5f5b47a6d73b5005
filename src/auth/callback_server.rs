//! Local HTTP callback server for OAuth authentication.
//!
//! Listens on the loopback port of the configured redirect URI, answers the
//! browser with a small status page and hands the callback URL back to the
//! sign-in flow.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};
use url::Url;

/// Result from the callback server.
#[derive(Debug, PartialEq)]
pub enum CallbackResult {
    /// Received a callback; carries the full URL including the query.
    Success(String),
    /// Server was cancelled.
    Cancelled,
    /// No callback arrived before the deadline.
    TimedOut,
    /// Error occurred.
    Error(String),
}

/// Extract the loopback port and callback path from a redirect URI.
pub fn loopback_target(redirect_uri: &str) -> Option<(u16, String)> {
    let url = Url::parse(redirect_uri).ok()?;

    match url.host_str()? {
        "localhost" | "127.0.0.1" => {}
        _ => return None,
    }

    Some((url.port_or_known_default()?, url.path().to_string()))
}

/// Wait for a single OAuth callback on `127.0.0.1:{port}{path}`.
///
/// Blocks the calling thread; run it on a blocking task. Returns when a
/// callback arrives, `cancel_rx` fires or disconnects, or `timeout` elapses.
pub fn start_callback_server(
    port: u16,
    path: &str,
    cancel_rx: mpsc::Receiver<()>,
    timeout: Duration,
) -> CallbackResult {
    let addr = format!("127.0.0.1:{}", port);

    let listener = match TcpListener::bind(&addr) {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind callback server to {}: {}", addr, e);
            return CallbackResult::Error(format!("Failed to start server: {}", e));
        }
    };

    // Non-blocking so cancellation and the deadline can be polled
    if let Err(e) = listener.set_nonblocking(true) {
        error!("Failed to set non-blocking mode: {}", e);
        return CallbackResult::Error(format!("Server configuration error: {}", e));
    }

    info!("OAuth callback server listening on {}", addr);
    let deadline = Instant::now() + timeout;

    loop {
        match cancel_rx.try_recv() {
            Ok(()) | Err(mpsc::TryRecvError::Disconnected) => {
                info!("Callback server cancelled");
                return CallbackResult::Cancelled;
            }
            Err(mpsc::TryRecvError::Empty) => {}
        }

        if Instant::now() >= deadline {
            info!("Callback server timed out");
            return CallbackResult::TimedOut;
        }

        match listener.accept() {
            Ok((stream, peer_addr)) => {
                debug!("Connection from {}", peer_addr);
                if let Some(url) = handle_connection(stream, port, path) {
                    info!("OAuth callback received");
                    return CallbackResult::Success(url);
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(e) => {
                error!("Error accepting connection: {}", e);
                return CallbackResult::Error(format!("Connection error: {}", e));
            }
        }
    }
}

/// Handle an incoming HTTP connection.
///
/// Returns Some(url) if this was an OAuth callback, None otherwise.
fn handle_connection(mut stream: TcpStream, port: u16, callback_path: &str) -> Option<String> {
    let _ = stream.set_nonblocking(false);
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));

    let mut buffer = [0; 4096];
    let bytes_read = match stream.read(&mut buffer) {
        Ok(n) => n,
        Err(e) => {
            debug!("Failed to read request: {}", e);
            return None;
        }
    };

    let request = String::from_utf8_lossy(&buffer[..bytes_read]);
    let request_line = request.lines().next()?;
    debug!("Received request: {}", request_line);

    let mut parts = request_line.split_whitespace();
    let (method, target) = match (parts.next(), parts.next()) {
        (Some(method), Some(target)) => (method, target),
        _ => {
            send_plain_response(&mut stream, 400, "Bad Request");
            return None;
        }
    };

    if method != "GET" {
        send_plain_response(&mut stream, 405, "Method Not Allowed");
        return None;
    }

    if !target.starts_with(callback_path) {
        send_plain_response(&mut stream, 404, "Not Found");
        return None;
    }

    let url = format!("http://localhost:{}{}", port, target);
    let query: Vec<(String, String)> = Url::parse(&url)
        .map(|u| u.query_pairs().into_owned().collect())
        .unwrap_or_default();
    let param = |name: &str| {
        query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    };

    // Error callbacks still go back to the caller so the cause is surfaced
    if param("error").is_some() {
        let reason = param("error_description")
            .unwrap_or_else(|| "Authentication was cancelled or failed.".to_string());
        send_page(&mut stream, &Page::failed(&reason));
        return Some(url);
    }

    if param("code").is_none() {
        send_plain_response(&mut stream, 400, "Missing authorization code");
        return None;
    }

    send_page(&mut stream, &Page::succeeded());
    Some(url)
}

/// Minimal status page shown in the browser tab after the redirect.
struct Page {
    title: &'static str,
    accent: &'static str,
    message: String,
    hint: &'static str,
}

impl Page {
    fn succeeded() -> Self {
        Self {
            title: "Authentication Successful",
            accent: "#10B981",
            message: "You are signed in to Office 365.".to_string(),
            hint: "You can close this tab now.",
        }
    }

    fn failed(reason: &str) -> Self {
        Self {
            title: "Authentication Failed",
            accent: "#EF4444",
            message: html_escape(reason),
            hint: "You can close this tab and try again.",
        }
    }

    fn render(&self) -> String {
        format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>{title}</title>
    <style>
        body {{ font-family: -apple-system, 'Segoe UI', Roboto, sans-serif; display: flex;
               align-items: center; justify-content: center; min-height: 100vh; margin: 0;
               background: #F3F4F6; }}
        .container {{ background: white; padding: 3rem; border-radius: 1rem; max-width: 400px;
                     text-align: center; border-top: 6px solid {accent}; }}
        h1 {{ color: #1F2937; font-size: 1.5rem; }}
        p {{ color: #6B7280; }}
        .hint {{ font-size: 0.875rem; color: #9CA3AF; }}
    </style>
</head>
<body>
    <div class="container">
        <h1>{title}</h1>
        <p>{message}</p>
        <p class="hint">{hint}</p>
    </div>
</body>
</html>"#,
            title = self.title,
            accent = self.accent,
            message = self.message,
            hint = self.hint,
        )
    }
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn send_page(stream: &mut TcpStream, page: &Page) {
    let html = page.render();
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        html.len(),
        html
    );

    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

fn send_plain_response(stream: &mut TcpStream, status: u16, message: &str) {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        message,
        message.len(),
        message
    );

    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}
