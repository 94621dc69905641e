use std::fs;
use std::io::Read;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::GzDecoder;
use h2::RecvStream;
use tempfile::TempDir;

use pushserve::{ApiHandler, Config, Exception, HeaderComposer, HttpRequestMethod, Request, Response, Server};

fn site() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("app")).unwrap();
    fs::write(dir.path().join("app/index.html"), "<h1>app</h1>").unwrap();
    fs::write(dir.path().join("app/a.js"), "console.log('a');").unwrap();
    fs::write(dir.path().join("app/b.css"), "p { color: blue; }").unwrap();
    fs::write(dir.path().join("app/c.js"), "console.log('c');").unwrap();
    dir
}

/// HTTP/2 模式的服务器。TLS 材料只在监听时才会载入，这里直接驱动内存管道。
fn h2_server(root: &TempDir, push: bool) -> Server {
    let config = Config::new()
        .with_tls("unused.key", "unused.crt")
        .with_server_push(push)
        .with_static_root(root.path().to_string_lossy().to_string());
    let server = Server::new(config).unwrap();
    server.set_server_push(vec![
        (
            "/app/index.html".to_string(),
            vec!["/app/a.js".to_string(), "/app/b.css".to_string()],
        ),
        // 被推送的资源同样命中规则，但推送只有一层
        ("/app/a.js".to_string(), vec!["/app/c.js".to_string()]),
    ]);
    server
}

async fn read_body(mut body: RecvStream) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk: Bytes = chunk.unwrap();
        let _ = body.flow_control().release_capacity(chunk.len());
        out.extend_from_slice(&chunk);
    }
    out
}

fn gunzip(data: &[u8]) -> String {
    let mut decoded = String::new();
    GzDecoder::new(data).read_to_string(&mut decoded).unwrap();
    decoded
}

struct Pushed {
    path: String,
    content_type: String,
    encoding: String,
    body: String,
}

/// 请求 `path`，返回主响应的状态码、解压后的内容以及全部推送
async fn fetch(server: &Server, path: &str) -> (u16, String, Vec<Pushed>) {
    let (client_io, server_io) = tokio::io::duplex(1 << 16);
    let srv = server.clone();
    tokio::spawn(async move {
        let _ = srv.serve_h2(server_io).await;
    });

    let (client, connection) = h2::client::handshake(client_io).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    let mut client = client.ready().await.unwrap();

    let request = http::Request::get(format!("https://localhost{}", path))
        .body(())
        .unwrap();
    let (mut response_future, _) = client.send_request(request, true).unwrap();
    let mut promises = response_future.push_promises();

    let response = response_future.await.unwrap();
    let status = response.status().as_u16();
    let gzipped = response.headers().get("content-encoding").is_some();
    let body = read_body(response.into_body()).await;
    let body = if gzipped {
        gunzip(&body)
    } else {
        String::from_utf8(body).unwrap()
    };

    let mut pushed = Vec::new();
    while let Some(promise) = promises.push_promise().await {
        let (request, response) = promise.unwrap().into_parts();
        let response = response.await.unwrap();
        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .map(|v| v.to_str().unwrap().to_string())
                .unwrap_or_default()
        };
        let content_type = header("content-type");
        let encoding = header("content-encoding");
        let data = read_body(response.into_body()).await;
        pushed.push(Pushed {
            path: request.uri().path().to_string(),
            content_type,
            encoding,
            body: gunzip(&data),
        });
    }
    (status, body, pushed)
}

#[tokio::test]
async fn test_push_cascade_is_one_level() {
    let dir = site();
    let server = h2_server(&dir, true);
    let (status, body, pushed) = fetch(&server, "/app/index.html").await;

    assert_eq!(status, 200);
    assert_eq!(body, "<h1>app</h1>");
    assert_eq!(pushed.len(), 2);

    assert_eq!(pushed[0].path, "/app/a.js");
    assert_eq!(pushed[0].content_type, "text/javascript;charset=utf-8");
    assert_eq!(pushed[0].encoding, "gzip");
    assert_eq!(pushed[0].body, "console.log('a');");

    assert_eq!(pushed[1].path, "/app/b.css");
    assert_eq!(pushed[1].content_type, "text/css;charset=utf-8");
    assert_eq!(pushed[1].body, "p { color: blue; }");
}

#[tokio::test]
async fn test_push_disabled() {
    let dir = site();
    let server = h2_server(&dir, false);
    let (status, body, pushed) = fetch(&server, "/app/index.html").await;
    assert_eq!(status, 200);
    assert_eq!(body, "<h1>app</h1>");
    assert!(pushed.is_empty());
}

#[tokio::test]
async fn test_missing_push_asset_is_skipped() {
    let dir = site();
    fs::remove_file(dir.path().join("app/b.css")).unwrap();
    let server = h2_server(&dir, true);
    let (status, _, pushed) = fetch(&server, "/app/index.html").await;
    assert_eq!(status, 200);
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].path, "/app/a.js");
}

#[tokio::test]
async fn test_h2_not_found() {
    let dir = site();
    let server = h2_server(&dir, true);
    let (status, _, pushed) = fetch(&server, "/missing.html").await;
    assert_eq!(status, 404);
    assert!(pushed.is_empty());
}

/// 记录每次调用收到的请求体，并原样写回
struct Recorder {
    bodies: Arc<Mutex<Vec<Option<Bytes>>>>,
}

#[async_trait]
impl ApiHandler for Recorder {
    async fn handle(
        &self,
        _request: &Request,
        response: &mut Response<'_>,
        body: Option<Bytes>,
    ) -> Result<(), Exception> {
        self.bodies.lock().unwrap().push(body.clone());
        let head = HeaderComposer::new(Arc::new(Vec::new()), true).compose("text/plain", 200, None, &[]);
        response.send(head, body.unwrap_or_default()).await
    }
}

#[tokio::test]
async fn test_h2_post_body_is_buffered_once() {
    let dir = site();
    let server = h2_server(&dir, true);
    let bodies = Arc::new(Mutex::new(Vec::new()));
    server.add_api(
        "/upload",
        HttpRequestMethod::Post,
        Recorder {
            bodies: Arc::clone(&bodies),
        },
    );

    let (client_io, server_io) = tokio::io::duplex(1 << 16);
    let srv = server.clone();
    tokio::spawn(async move {
        let _ = srv.serve_h2(server_io).await;
    });
    let (client, connection) = h2::client::handshake(client_io).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    let mut client = client.ready().await.unwrap();

    let request = http::Request::post("https://localhost/upload").body(()).unwrap();
    let (response_future, mut stream) = client.send_request(request, false).unwrap();
    stream.send_data(Bytes::from_static(b"first,"), false).unwrap();
    stream.send_data(Bytes::from_static(b"second,"), false).unwrap();
    stream.send_data(Bytes::from_static(b"third"), true).unwrap();

    let response = response_future.await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let echoed = read_body(response.into_body()).await;
    assert_eq!(echoed, b"first,second,third");

    let bodies = bodies.lock().unwrap();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0].as_deref(), Some(&b"first,second,third"[..]));
}
