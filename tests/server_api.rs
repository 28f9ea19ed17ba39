use modelpull::broadcast::{serve, AppState, Broadcaster};
use modelpull::download::JobFile;
use modelpull::presets::PresetCatalog;
use modelpull::progress::{ProgressRecord, ProgressSnapshot, ProgressStore};
use modelpull::validate::Validator;
use parking_lot::Mutex;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const CATALOG: &str = r#"
[presets.P1]
name = "Preset One"
category = "Image Generation"
files = [{ path = "checkpoints/m.safetensors", url = "https://x/m.safetensors", size = "100MB" }]

[presets.P2]
name = "Preset Two"
category = "Audio"
files = [{ path = "audio/a.bin", url = "https://x/a.bin", size = "1.5GB (1536MB)" }]
"#;

struct TestServer {
    base: String,
    store: ProgressStore,
    broadcaster: Arc<Broadcaster>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<modelpull::Result<()>>,
}

impl TestServer {
    async fn start(root: &Path) -> Self {
        let catalog = Arc::new(PresetCatalog::from_toml_str(CATALOG).unwrap());
        let store = ProgressStore::new(root.join("progress.json"));
        let broadcaster = Arc::new(Broadcaster::new(store.clone()));
        let state = AppState {
            broadcaster: Arc::clone(&broadcaster),
            validator: Arc::new(Mutex::new(Validator::new(catalog, root.join("models")))),
            store: store.clone(),
            job_file: JobFile::new(root.join("job.json")),
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(serve(
            listener,
            state,
            Duration::from_millis(20),
            async {
                let _ = shutdown_rx.await;
            },
        ));

        Self {
            base,
            store,
            broadcaster,
            shutdown: Some(shutdown_tx),
            handle,
        }
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let response = reqwest::get(format!("{}{path}", self.base)).await.unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    async fn connect(&self) -> Client {
        let url = format!("{}/ws", self.base.replacen("http", "ws", 1));
        let (socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        socket
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.handle.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_status_defaults_to_not_started() {
    let temp_dir = TempDir::new().unwrap();
    let server = TestServer::start(temp_dir.path()).await;

    let (code, body) = server.get("/api/status").await;
    assert_eq!(code, 200);
    assert_eq!(body["status"], "not_started");
    assert_eq!(body["progress"], 0);
    assert_eq!(body["presets"], Value::Array(Vec::new()));

    server.stop().await;
}

#[tokio::test]
async fn test_progress_reflects_store() {
    let temp_dir = TempDir::new().unwrap();
    let server = TestServer::start(temp_dir.path()).await;

    let mut snapshot = ProgressSnapshot {
        job_id: Some("job-1".to_string()),
        ..ProgressSnapshot::default()
    };
    let mut record = ProgressRecord::queued(1, 100);
    record.bytes_done = 25;
    snapshot.presets.insert("P1".to_string(), record);
    server.store.save(&snapshot).unwrap();

    let (_, progress) = server.get("/api/progress").await;
    assert_eq!(progress["job_id"], "job-1");
    assert_eq!(progress["presets"]["P1"]["bytes_done"], 25);

    // No job file, so the queued preset was left behind by a stopped job
    let (_, status) = server.get("/api/status").await;
    assert_eq!(status["status"], "stopped");
    assert_eq!(status["presets"][0]["id"], "P1");

    server.stop().await;
}

#[tokio::test]
async fn test_validation_routes() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("models/checkpoints/m.safetensors");
    std::fs::create_dir_all(file.parent().unwrap()).unwrap();
    std::fs::File::create(&file)
        .unwrap()
        .set_len(104_857_600)
        .unwrap();

    let server = TestServer::start(temp_dir.path()).await;

    let (_, summary) = server.get("/api/validate/summary").await;
    assert_eq!(summary["overall_status"], "not_validated");

    let (code, report) = server.get("/api/validate/P1").await;
    assert_eq!(code, 200);
    assert_eq!(report["valid"], true);
    assert_eq!(report["missing"], Value::Array(Vec::new()));

    let (code, _) = server.get("/api/validate/NOPE").await;
    assert_eq!(code, 404);

    let (_, reports) = server.get("/api/validate?category=audio").await;
    assert_eq!(reports.as_array().map(Vec::len), Some(1));
    assert_eq!(reports[0]["missing"][0], "audio/a.bin");

    let (_, summary) = server.get("/api/validate/summary").await;
    assert_eq!(summary["total_presets"], 2);
    assert_eq!(summary["valid_presets"], 1);
    assert_eq!(summary["overall_status"], "invalid");

    server.stop().await;
}

/// Next JSON text frame from the server, skipping control frames
async fn next_json(client: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("no message within 5s")
            .unwrap()
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn send_json(client: &mut Client, value: Value) {
    client.send(Message::text(value.to_string())).await.unwrap();
}

#[tokio::test]
async fn test_websocket_conversation() {
    let temp_dir = TempDir::new().unwrap();
    let server = TestServer::start(temp_dir.path()).await;
    let mut client = server.connect().await;

    let hello = next_json(&mut client).await;
    assert_eq!(hello["type"], "progress_update");
    assert!(hello["timestamp"].is_string());
    assert!(hello["data"]["presets"].is_object());

    // The first poll may push the unchanged store as well
    tokio::time::sleep(Duration::from_millis(100)).await;

    send_json(&mut client, json!({ "type": "ping" })).await;
    let mut reply = next_json(&mut client).await;
    while reply["type"] == "progress_update" {
        reply = next_json(&mut client).await;
    }
    assert_eq!(reply["type"], "pong");

    send_json(&mut client, json!({ "type": "subscribe", "channel": "downloads" })).await;
    let reply = next_json(&mut client).await;
    assert_eq!(reply["type"], "subscribed");
    assert_eq!(reply["channel"], "downloads");

    send_json(&mut client, json!({ "type": "get_progress" })).await;
    let reply = next_json(&mut client).await;
    assert_eq!(reply["type"], "progress_update");

    send_json(&mut client, json!({ "type": "reboot" })).await;
    let reply = next_json(&mut client).await;
    assert_eq!(reply["type"], "error");

    client.close(None).await.unwrap();
    server.stop().await;
}

#[tokio::test]
async fn test_websocket_pushes_store_changes() {
    let temp_dir = TempDir::new().unwrap();
    let server = TestServer::start(temp_dir.path()).await;
    let mut client = server.connect().await;
    next_json(&mut client).await;

    let mut snapshot = ProgressSnapshot {
        job_id: Some("job-7".to_string()),
        ..ProgressSnapshot::default()
    };
    snapshot
        .presets
        .insert("P2".to_string(), ProgressRecord::queued(1, 1024));
    server.store.save(&snapshot).unwrap();

    // Unsolicited; the client sends nothing
    let pushed = loop {
        let message = next_json(&mut client).await;
        if message["data"]["job_id"] == "job-7" {
            break message;
        }
    };
    assert_eq!(pushed["type"], "progress_update");
    assert_eq!(pushed["data"]["presets"]["P2"]["files_total"], 1);

    assert_eq!(server.broadcaster.client_count(), 1);
    client.close(None).await.unwrap();
    drop(client);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while server.broadcaster.client_count() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(server.broadcaster.client_count(), 0);

    server.stop().await;
}

#[tokio::test]
async fn test_concurrent_validation_requests() {
    let temp_dir = TempDir::new().unwrap();
    let server = TestServer::start(temp_dir.path()).await;

    let (all, summary, one, status) = tokio::join!(
        server.get("/api/validate"),
        server.get("/api/validate/summary"),
        server.get("/api/validate/P2"),
        server.get("/api/status"),
    );

    assert_eq!(all.0, 200);
    assert_eq!(all.1.as_array().map(Vec::len), Some(2));
    assert_eq!(summary.0, 200);
    assert_eq!(one.0, 200);
    assert_eq!(one.1["valid"], false);
    assert_eq!(status.0, 200);

    server.stop().await;
}
