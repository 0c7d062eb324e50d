//! Router-level tests driven through `tower::ServiceExt::oneshot`.

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use futures::StreamExt;
use sealzip_core::config::SealzipConfig;
use sealzip_core::types::{Operation, OperationRecord};
use sealzip_crypto::{CipherOptions, KdfProfile};
use sealzipd::{router, AppState, MetadataSink};
use secrecy::SecretString;
use std::io::Read;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "sealzipd-test";
const MIB: usize = 1024 * 1024;

#[derive(Default)]
struct Recording(Mutex<Vec<OperationRecord>>);

impl MetadataSink for Recording {
    fn record(&self, record: OperationRecord) {
        self.0.lock().unwrap().push(record);
    }
}

impl Recording {
    async fn wait_for(&self, n: usize) -> Vec<OperationRecord> {
        for _ in 0..200 {
            {
                let records = self.0.lock().unwrap();
                if records.len() >= n {
                    return records.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {n} usage records");
    }
}

struct TestApp {
    router: Router,
    sink: Arc<Recording>,
    spool_root: PathBuf,
    _tmp: TempDir,
}

fn app_with(tweak: impl FnOnce(&mut SealzipConfig)) -> TestApp {
    let tmp = TempDir::new().unwrap();
    let mut config = SealzipConfig::default();
    config.server.temp_dir = tmp.path().join("spool");
    config.batch.concurrency = 2;
    config.batch.chunk_size = 16 * 1024;
    tweak(&mut config);

    let sink = Arc::new(Recording::default());
    let mut state = AppState::new(config, sink.clone()).unwrap();
    state.cipher.profile = KdfProfile::custom(8);
    state.pipeline.cipher.profile = KdfProfile::custom(8);

    TestApp {
        spool_root: state.config.server.temp_dir.clone(),
        router: router(Arc::new(state)),
        sink,
        _tmp: tmp,
    }
}

fn app() -> TestApp {
    app_with(|_| {})
}

#[derive(Default)]
struct Form(Vec<u8>);

impl Form {
    fn text(mut self, name: &str, value: &str) -> Self {
        self.0.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                .as_bytes(),
        );
        self
    }

    fn file(mut self, name: &str, filename: &str, data: &[u8]) -> Self {
        self.0.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        self.0.extend_from_slice(data);
        self.0.extend_from_slice(b"\r\n");
        self
    }

    fn request(mut self, uri: &str, tenant: Option<&str>) -> Request<Body> {
        self.0.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        let mut builder = Request::builder().method("POST").uri(uri).header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
        if let Some(tenant) = tenant {
            builder = builder.header("x-tenant-id", tenant);
        }
        builder.body(Body::from(self.0)).unwrap()
    }
}

async fn send(app: &TestApp, req: Request<Body>) -> Response {
    app.router.clone().oneshot(req).await.unwrap()
}

async fn body_bytes(resp: Response) -> Vec<u8> {
    to_bytes(resp.into_body(), usize::MAX).await.unwrap().to_vec()
}

async fn body_json(resp: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(resp).await).unwrap()
}

fn disposition(resp: &Response) -> String {
    resp.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .to_string()
}

async fn encrypt(app: &TestApp, filename: &str, data: &[u8], password: &str) -> Vec<u8> {
    let req = Form::default()
        .text("password", password)
        .file("file", filename, data)
        .request("/v1/encrypt", Some("acme"));
    let resp = send(app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    body_bytes(resp).await
}

async fn spool_is_clean(app: &TestApp) -> bool {
    for _ in 0..200 {
        let empty = std::fs::read_dir(&app.spool_root)
            .map(|mut d| d.next().is_none())
            .unwrap_or(true);
        if empty {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn healthz_is_ok() {
    let app = app();
    let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
    let resp = send(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_tenant_is_unauthorized() {
    let app = app();
    let req = Form::default()
        .text("password", "pw")
        .file("file", "a.txt", b"data")
        .request("/v1/encrypt", None);

    let resp = send(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(resp).await["message"], "Unauthorized");
}

#[tokio::test]
async fn encrypt_then_decrypt_roundtrip() {
    let app = app();
    let plaintext: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();

    let req = Form::default()
        .text("password", "correct horse")
        .file("file", "notes.txt", &plaintext)
        .request("/v1/encrypt", Some("acme"));
    let resp = send(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/octet-stream");
    assert_eq!(resp.headers()[header::CACHE_CONTROL], "private, no-store, no-transform");
    assert_eq!(resp.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    let cd = disposition(&resp);
    assert!(cd.contains("filename=\"notes.txt.enc\""), "{cd}");
    assert!(cd.contains("filename*=UTF-8''notes.txt.enc"), "{cd}");

    let frame = body_bytes(resp).await;
    assert_eq!(frame.len(), plaintext.len() + 44);

    let req = Form::default()
        .text("password", "correct horse")
        .file("file", "notes.txt.enc", &frame)
        .request("/v1/decrypt", Some("acme"));
    let resp = send(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(disposition(&resp).contains("filename=\"notes.txt\""));
    assert_eq!(body_bytes(resp).await, plaintext);

    let records = app.sink.wait_for(2).await;
    assert!(records.iter().all(|r| r.success && r.tenant == "acme"));
    assert!(records.iter().any(|r| r.operation == Operation::Decrypt));
    assert!(spool_is_clean(&app).await);
}

#[tokio::test]
async fn wrong_password_is_422_with_json_body() {
    let app = app();
    let frame = encrypt(&app, "a.txt", b"secret contents", "right").await;

    let req = Form::default()
        .text("password", "wrong")
        .file("file", "a.txt.enc", &frame)
        .request("/v1/decrypt", Some("acme"));
    let resp = send(&app, req).await;

    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = body_json(resp).await;
    assert_eq!(json["message"], "Unprocessable Entity");
    assert_eq!(json["data"]["error"], "wrong password or corrupted ciphertext");

    let records = app.sink.wait_for(2).await;
    assert!(records.iter().any(|r| r.operation == Operation::Decrypt && !r.success));
}

#[tokio::test]
async fn tampered_frame_is_422() {
    let app = app();
    let mut frame = encrypt(&app, "a.txt", b"secret contents", "pw").await;
    frame[30] ^= 0x01;

    let req = Form::default()
        .text("password", "pw")
        .file("file", "a.txt.enc", &frame)
        .request("/v1/decrypt", Some("acme"));
    assert_eq!(send(&app, req).await.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn truncated_frame_is_400() {
    let app = app();
    let req = Form::default()
        .text("password", "pw")
        .file("file", "short.enc", &[0u8; 10])
        .request("/v1/decrypt", Some("acme"));

    let resp = send(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(resp).await["data"]["error"],
        "encrypted input is shorter than the frame header"
    );
}

#[tokio::test]
async fn legacy_profile_selected_by_form_field() {
    let app = app();
    let opts = CipherOptions {
        profile: KdfProfile::LegacyN14,
        ..CipherOptions::default()
    };
    let job = sealzip_crypto::encrypt(std::io::Cursor::new(b"old blob".to_vec()), SecretString::from("pw"), &opts);
    let frame: Vec<u8> = job
        .output
        .map(|chunk| chunk.unwrap().to_vec())
        .concat()
        .await;

    let req = Form::default()
        .text("password", "pw")
        .text("kdf", "legacy-n14")
        .file("file", "old.bin.enc", &frame)
        .request("/v1/decrypt", Some("acme"));
    let resp = send(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_bytes(resp).await, b"old blob");
}

#[tokio::test]
async fn encrypt_validation_errors_reported_together() {
    let app = app();
    let req = Form::default().text("kdf", "md5").request("/v1/encrypt", Some("acme"));

    let resp = send(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let json = body_json(resp).await;
    assert_eq!(json["message"], "Request Error");
    let errors: Vec<String> = serde_json::from_value(json["data"]["errors"].clone()).unwrap();
    assert!(errors.contains(&"no file found in the request".to_string()));
    assert!(errors.contains(&"no password found in the request".to_string()));
    assert_eq!(errors.len(), 3);
}

#[tokio::test]
async fn encrypt_refuses_executables() {
    let app = app();
    let req = Form::default()
        .text("password", "pw")
        .file("file", "setup.exe", b"MZ")
        .request("/v1/encrypt", Some("acme"));
    assert_eq!(send(&app, req).await.status(), StatusCode::BAD_REQUEST);
}

fn zip_entries(bytes: Vec<u8>) -> Vec<(String, Vec<u8>)> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
    let mut out: Vec<_> = (0..archive.len())
        .map(|i| {
            let mut entry = archive.by_index(i).unwrap();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            (entry.name().to_string(), data)
        })
        .collect();
    out.sort();
    out
}

async fn decrypt_via_http(app: &TestApp, frame: &[u8], password: &str) -> Vec<u8> {
    let req = Form::default()
        .text("password", password)
        .file("file", "x.enc", frame)
        .request("/v1/decrypt", Some("acme"));
    let resp = send(app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    body_bytes(resp).await
}

#[tokio::test]
async fn batch_partial_success() {
    let app = app();
    let req = Form::default()
        .file("passwords", "passwords.csv", b"filename;password\na.txt;pa\nc.txt;pc\n")
        .file("files", "a.txt", b"alpha")
        .file("files", "b.txt", b"bravo")
        .file("files", "c.txt", b"charlie")
        .request("/v1/encrypt/batch", Some("acme"));

    let resp = send(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/zip");
    let cd = disposition(&resp);
    assert!(cd.contains("filename=\"encrypted_"), "{cd}");
    assert!(cd.contains(".zip\""), "{cd}");

    let entries = zip_entries(body_bytes(resp).await);
    let names: Vec<_> = entries.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, ["a.txt.enc", "c.txt.enc"]);
    assert_eq!(decrypt_via_http(&app, &entries[0].1, "pa").await, b"alpha");
    assert_eq!(decrypt_via_http(&app, &entries[1].1, "pc").await, b"charlie");

    let records = app.sink.wait_for(1).await;
    let batch = records
        .iter()
        .find(|r| r.operation == Operation::BatchEncrypt)
        .unwrap();
    assert!(batch.success);
    assert_eq!(batch.file_count, 2);
    assert!(spool_is_clean(&app).await);
}

#[tokio::test]
async fn batch_excludes_file_over_limit() {
    let app = app_with(|c| c.limits.max_file_bytes = 10 * MIB as u64);
    let big = vec![0x5au8; 11 * MIB];
    let req = Form::default()
        .file("passwords", "pw.csv", b"f,p\nbig.bin,x\nsmall.txt,y\n")
        .file("files", "big.bin", &big)
        .file("files", "small.txt", b"small")
        .request("/v1/encrypt/batch", Some("acme"));

    let resp = send(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let entries = zip_entries(body_bytes(resp).await);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, "small.txt.enc");
}

#[tokio::test]
async fn batch_without_files_is_rejected() {
    let app = app();
    let req = Form::default()
        .file("passwords", "passwords.csv", b"h\na.txt;x\n")
        .request("/v1/encrypt/batch", Some("acme"));

    let resp = send(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["data"]["errors"][0], "no files to encrypt");
    assert!(spool_is_clean(&app).await);
}
