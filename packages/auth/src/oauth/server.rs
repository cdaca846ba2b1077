// ABOUTME: Loopback HTTP receiver for the OAuth authorization redirect
// ABOUTME: Binds 127.0.0.1, waits for the callback path, and returns its decoded query parameters

use std::net::SocketAddr;
use std::time::Duration;

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc,
    time::timeout,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    error::{AuthError, AuthResult},
    oauth::types::CallbackParams,
};

const MAX_REQUEST_BYTES: usize = 8192;

/// Connections that send no request head within this window are closed
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// One-shot redirect receiver bound to a loopback port
pub struct CallbackServer {
    listener: TcpListener,
    addr: SocketAddr,
    base_url: Url,
    path: String,
}

impl CallbackServer {
    /// Bind to `127.0.0.1:port` (port 0 picks a free port)
    pub async fn bind(port: u16, path: &str) -> AuthResult<Self> {
        let requested = format!("127.0.0.1:{}", port);
        let listener = TcpListener::bind(&requested).await.map_err(|e| {
            AuthError::CallbackServer(format!("Failed to bind to {}: {}", requested, e))
        })?;
        let addr = listener.local_addr()?;
        let base_url = Url::parse(&format!("http://127.0.0.1:{}/", addr.port()))?;

        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };

        debug!("Callback server bound on {}", addr);
        Ok(Self {
            listener,
            addr,
            base_url,
            path,
        })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Redirect URI to register in the authorization request
    pub fn callback_url(&self) -> String {
        format!("http://127.0.0.1:{}{}", self.addr.port(), self.path)
    }

    /// Serve until a request hits the callback path, then return its parameters.
    /// Requests for other paths (a browser asking for /favicon.ico) get a 404 and are ignored.
    /// Each connection is read in its own task, so an idle preconnect cannot hold up
    /// the real redirect.
    pub async fn wait_for_callback(&self) -> AuthResult<CallbackParams> {
        info!("Waiting for OAuth callback on {}", self.addr);

        let (results, mut received) = mpsc::channel::<CallbackParams>(1);

        loop {
            tokio::select! {
                Some(params) = received.recv() => {
                    info!("Received OAuth callback");
                    return Ok(params);
                }
                accepted = self.listener.accept() => {
                    let (stream, peer_addr) = accepted.map_err(|e| {
                        AuthError::CallbackServer(format!("Failed to accept connection: {}", e))
                    })?;
                    debug!("Received connection from {}", peer_addr);

                    tokio::spawn(handle_connection(
                        stream,
                        self.base_url.clone(),
                        self.path.clone(),
                        results.clone(),
                    ));
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    base_url: Url,
    callback_path: String,
    results: mpsc::Sender<CallbackParams>,
) {
    let target = match timeout(REQUEST_READ_TIMEOUT, read_request_target(&mut stream)).await {
        Ok(Ok(Some(target))) => target,
        Ok(Ok(None)) => {
            let _ = write_response(&mut stream, "400 Bad Request", &error_page("Malformed request"))
                .await;
            return;
        }
        Ok(Err(e)) => {
            warn!("Failed to read callback request: {}", e);
            return;
        }
        Err(_) => {
            debug!("Closing connection that sent no request");
            return;
        }
    };

    let url = match base_url.join(&target) {
        Ok(url) => url,
        Err(_) => {
            let _ = write_response(&mut stream, "400 Bad Request", &error_page("Malformed request"))
                .await;
            return;
        }
    };

    if url.path() != callback_path {
        debug!("Ignoring request for {}", url.path());
        let _ = write_response(&mut stream, "404 Not Found", "").await;
        return;
    }

    let params = CallbackParams::from_url(&url);
    let (status, body) = match (&params.code, &params.error) {
        (_, Some(error)) => (
            "400 Bad Request",
            error_page(params.error_description.as_deref().unwrap_or(error)),
        ),
        (Some(_), None) => ("200 OK", SUCCESS_HTML.to_string()),
        (None, None) => (
            "400 Bad Request",
            error_page("No authorization code found in request"),
        ),
    };

    if let Err(e) = write_response(&mut stream, status, &body).await {
        warn!("Failed to send callback response: {}", e);
    }

    // Only the first callback is used; later ones are answered and dropped
    let _ = results.try_send(params);
}

/// Read the request head and return the target of a GET request line
async fn read_request_target(stream: &mut TcpStream) -> std::io::Result<Option<String>> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if buffer.windows(4).any(|w| w == b"\r\n\r\n") || buffer.len() >= MAX_REQUEST_BYTES {
            break;
        }
    }

    let head = String::from_utf8_lossy(&buffer);
    Ok(parse_request_line(&head))
}

fn parse_request_line(head: &str) -> Option<String> {
    let mut parts = head.lines().next()?.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("GET"), Some(target)) if target.starts_with('/') => Some(target.to_string()),
        _ => None,
    }
}

async fn write_response(stream: &mut TcpStream, status: &str, body: &str) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

fn error_page(message: &str) -> String {
    format!(
        r#"<html><body><h1>Authentication Failed</h1><p>{}</p><p>You can close this tab and return to the application.</p></body></html>"#,
        html_escape(message)
    )
}

fn html_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

const SUCCESS_HTML: &str = r#"<html>
<head>
    <title>CherryIN Login Successful</title>
    <style>
        body { font-family: system-ui, -apple-system, sans-serif; max-width: 600px; margin: 100px auto; text-align: center; }
        h1 { color: #22c55e; }
        p { color: #64748b; }
    </style>
</head>
<body>
    <h1>Login Successful</h1>
    <p>You are now signed in to CherryIN.</p>
    <p>You can close this tab and return to the application.</p>
</body>
</html>"#;
