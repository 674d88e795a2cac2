//! Minimal one-shot HTTP server for exercising the Ollama client in tests

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub struct FakeOllama {
    pub base_url: String,
    /// Resolves to the raw request (head and body) once the response is sent
    pub request: JoinHandle<String>,
}

/// Serve one request, writing `body_parts` as separate writes with a short
/// pause between them, then close the connection.
pub async fn serve_once(body_parts: Vec<&'static str>) -> FakeOllama {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let request = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;

        socket
            .write_all(
                b"HTTP/1.1 200 OK\r\n\
                  Content-Type: application/x-ndjson\r\n\
                  Connection: close\r\n\r\n",
            )
            .await
            .unwrap();
        // The client may hang up early once it has seen `done`
        for part in body_parts {
            if socket.write_all(part.as_bytes()).await.is_err() || socket.flush().await.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let _ = socket.shutdown().await;
        request
    });

    FakeOllama { base_url, request }
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&buf);
        if let Some(head_end) = text.find("\r\n\r\n") {
            let content_length = text[..head_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= head_end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}
