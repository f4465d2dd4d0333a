use anyhow::Result;
use serde_json::Value;
use std::fs::File;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use tempfile::tempdir;

use image::codecs::gif::GifEncoder;
use image::{Delay, Rgba, RgbaImage};
use zonewatch::api::{ApiConfig, ApiHandle, ApiServer};
use zonewatch::{
    iou_tracker_factory, BlobBackend, IouTrackerConfig, ModelSlot, SessionManager,
    SqliteZoneStore, UploadStore,
};

struct TestApi {
    _dir: tempfile::TempDir,
    api_handle: Option<ApiHandle>,
}

impl TestApi {
    fn new() -> Result<Self> {
        let dir = tempdir()?;
        let db_path = dir.path().join("zones.db");
        let zones = Arc::new(SqliteZoneStore::open(&db_path.to_string_lossy())?);
        let sessions = SessionManager::new(
            UploadStore::new(dir.path().join("uploads"), 1 << 20),
            zones,
            ModelSlot::ready(Arc::new(BlobBackend::new())),
        )
        .with_tracker_factory(iou_tracker_factory(IouTrackerConfig {
            n_init: 1,
            ..IouTrackerConfig::default()
        }));

        let api_config = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            max_body_bytes: 1 << 20,
            ..ApiConfig::default()
        };
        let api_handle = ApiServer::new(api_config, Arc::new(sessions)).spawn()?;

        Ok(Self {
            _dir: dir,
            api_handle: Some(api_handle),
        })
    }

    fn handle(&self) -> &ApiHandle {
        self.api_handle
            .as_ref()
            .expect("test API handle should be initialized")
    }

    fn send(
        &self,
        method: &str,
        path: &str,
        user: Option<&str>,
        extra_headers: &[(&str, &str)],
        body: &[u8],
    ) -> Result<(String, Value)> {
        let mut stream = TcpStream::connect(self.handle().addr)?;
        let mut request = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n");
        if let Some(user) = user {
            request.push_str(&format!("Authorization: Bearer {user}\r\n"));
        }
        for (name, value) in extra_headers {
            request.push_str(&format!("{name}: {value}\r\n"));
        }
        request.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
        stream.write_all(request.as_bytes())?;
        stream.write_all(body)?;

        let mut response = String::new();
        stream.read_to_string(&mut response)?;
        let mut parts = response.splitn(2, "\r\n\r\n");
        let headers = parts.next().unwrap_or("").to_string();
        let body = parts.next().unwrap_or("");
        let value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(body)?
        };
        Ok((headers, value))
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.api_handle.take() {
            handle.stop().expect("failed to stop API server");
        }
    }
}

fn gif_bytes(dir: &std::path::Path, frames: u32) -> Result<Vec<u8>> {
    let path = dir.join("upload_source.gif");
    {
        let mut encoder = GifEncoder::new(File::create(&path)?);
        let frames = (0..frames).map(|i| {
            let mut image = RgbaImage::from_pixel(64, 48, Rgba([0, 0, 0, 255]));
            for y in 20..32 {
                for x in 8 + i..20 + i {
                    image.put_pixel(x, y, Rgba([255, 255, 255, 255]));
                }
            }
            image::Frame::from_parts(image, 0, 0, Delay::from_numer_denom_ms(40, 1))
        });
        encoder.encode_frames(frames)?;
    }
    Ok(std::fs::read(path)?)
}

#[test]
fn health_is_public() -> Result<()> {
    let api = TestApi::new()?;
    let (headers, body) = api.send("GET", "/health", None, &[], b"")?;
    assert!(headers.contains("200 OK"));
    assert_eq!(body["status"], "ok");
    assert_eq!(body["model_ready"], true);
    Ok(())
}

#[test]
fn api_rejects_missing_user() -> Result<()> {
    let api = TestApi::new()?;
    let (headers, body) = api.send("GET", "/api/zones", None, &[], b"")?;
    assert!(headers.contains("401 Unauthorized"));
    assert_eq!(body["error"], "missing_token");
    Ok(())
}

#[test]
fn zones_are_scoped_per_user() -> Result<()> {
    let api = TestApi::new()?;
    let zone = br#"{"name":"entrance","coordinates":[{"x":0,"y":0},{"x":500,"y":0},{"x":500,"y":1000},{"x":0,"y":1000}]}"#;

    let (headers, created) = api.send("POST", "/api/zones", Some("alice"), &[], zone)?;
    assert!(headers.contains("201 Created"));
    let id = created["id"].as_str().unwrap_or_default().to_string();
    assert_eq!(id.len(), 32);

    let (_, alice) = api.send("GET", "/api/zones", Some("alice"), &[], b"")?;
    assert_eq!(alice.as_array().map(Vec::len), Some(1));
    assert_eq!(alice[0]["name"], "entrance");
    let (_, bob) = api.send("GET", "/api/zones", Some("bob"), &[], b"")?;
    assert_eq!(bob.as_array().map(Vec::len), Some(0));

    let path = format!("/api/zones/{id}");
    let (headers, _) = api.send("DELETE", &path, Some("bob"), &[], b"")?;
    assert!(headers.contains("404 Not Found"));
    let (headers, _) = api.send("DELETE", &path, Some("alice"), &[], b"")?;
    assert!(headers.contains("200 OK"));
    Ok(())
}

#[test]
fn upload_start_step_stop() -> Result<()> {
    let api = TestApi::new()?;
    let dir = tempdir()?;
    let zone = br#"{"name":"left","points":[{"x":0,"y":0},{"x":500,"y":0},{"x":500,"y":1000},{"x":0,"y":1000}]}"#;
    let (_, created) = api.send("POST", "/api/zones", Some("alice"), &[], zone)?;
    let zone_id = created["id"].as_str().unwrap_or_default().to_string();

    let (headers, body) = api.send("POST", "/api/analysis/start", Some("alice"), &[], b"")?;
    assert!(headers.contains("400 Bad Request"));
    assert_eq!(body["error"], "no_upload");

    let video = gif_bytes(dir.path(), 2)?;
    let (headers, body) = api.send(
        "POST",
        "/api/upload_video",
        Some("alice"),
        &[("X-Filename", "../lobby cam.gif")],
        &video,
    )?;
    assert!(headers.contains("200 OK"));
    let stored = body["file"].as_str().unwrap_or_default();
    assert!(stored.starts_with("alice_"));
    assert!(stored.ends_with("_lobby_cam.gif"));

    let (headers, body) = api.send("POST", "/api/analysis/start", Some("alice"), &[], b"")?;
    assert!(headers.contains("200 OK"));
    assert_eq!(body["total_frames"], 2);

    let (headers, frame) = api.send("GET", "/api/analysis/frame", Some("alice"), &[], b"")?;
    assert!(headers.contains("200 OK"));
    assert_eq!(frame["current_frame"], 1);
    assert_eq!(frame["total_frames"], 2);
    assert_eq!(frame["active_track_count"], 1);
    assert_eq!(frame["end_of_stream"], false);
    assert_eq!(frame["zone_counts"][&zone_id]["count"], 1);
    assert_eq!(frame["zone_counts"][&zone_id]["name"], "left");
    assert!(frame["frame_image"].as_str().is_some_and(|s| !s.is_empty()));
    assert!(frame["heatmap_image"].as_str().is_some_and(|s| !s.is_empty()));

    let (headers, _) = api.send("POST", "/api/analysis/stop", Some("alice"), &[], b"")?;
    assert!(headers.contains("200 OK"));
    let (headers, body) = api.send("GET", "/api/analysis/frame", Some("alice"), &[], b"")?;
    assert!(headers.contains("400 Bad Request"));
    assert_eq!(body["error"], "no_active_session");
    Ok(())
}

#[test]
fn stream_ends_with_end_of_stream_payload() -> Result<()> {
    let api = TestApi::new()?;
    let dir = tempdir()?;
    let video = gif_bytes(dir.path(), 1)?;
    api.send("POST", "/api/upload_video", Some("carol"), &[], &video)?;
    api.send("POST", "/api/analysis/start", Some("carol"), &[], b"")?;

    let (_, first) = api.send("GET", "/api/analysis/frame", Some("carol"), &[], b"")?;
    assert_eq!(first["end_of_stream"], false);
    let (headers, end) = api.send("GET", "/api/analysis/frame", Some("carol"), &[], b"")?;
    assert!(headers.contains("200 OK"));
    assert_eq!(end["end_of_stream"], true);
    assert!(end.get("frame_image").is_none());

    let (_, after) = api.send("GET", "/api/analysis/frame", Some("carol"), &[], b"")?;
    assert_eq!(after["error"], "no_active_session");
    Ok(())
}
