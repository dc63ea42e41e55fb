use anyhow::{bail, Context, Result};
use indicatif::ProgressBar;
use park_core::upload::{UploadStatus, UPDATE_FIELD};
use reqwest::blocking::{multipart, Body, Client};
use serde::Deserialize;
use std::io::Read;
use std::time::Duration;

pub const SHA256_HEADER: &str = "X-Firmware-Sha256";

/// `GET /api/system`
#[derive(Debug, Deserialize)]
pub struct SystemInfo {
    pub app_name: String,
    pub version: String,
    pub hostname: String,
    pub running_slot: Option<SlotInfo>,
    pub uptime: String,
    pub free_heap: u32,
}

#[derive(Debug, Deserialize)]
pub struct SlotInfo {
    pub label: String,
    pub version: Option<String>,
}

/// Error body the device sends with every non-2xx response
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

pub struct Device {
    base: String,
    client: Client,
}

impl Device {
    /// `host` is an IP, a `.local` name, or `host:port`
    pub fn new(host: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base: base_url(host),
            client,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn system_info(&self) -> Result<SystemInfo> {
        let response = self.client.get(self.url("/api/system")).send()?;
        Ok(check(response)?.json()?)
    }

    pub fn ota_status(&self) -> Result<UploadStatus> {
        let response = self.client.get(self.url("/api/ota/status")).send()?;
        Ok(check(response)?.json()?)
    }

    /// Browser-style multipart upload to `/update?size=N`
    pub fn upload_form(&self, image: Vec<u8>, file_name: &str, pb: &ProgressBar) -> Result<String> {
        let size = image.len() as u64;
        let part = multipart::Part::reader_with_length(ProgressReader::new(image, pb.clone()), size)
            .file_name(file_name.to_string())
            .mime_str("application/octet-stream")?;
        let form = multipart::Form::new().part(UPDATE_FIELD, part);

        let response = self
            .client
            .post(self.url(&format!("/update?size={}", size)))
            .multipart(form)
            .send()?;
        Ok(check(response)?.text()?)
    }

    /// Open OTA mode, then push the raw image to `/ota/upload`
    pub fn push(&self, image: Vec<u8>, sha256: &str, pb: &ProgressBar) -> Result<String> {
        let response = self.client.get(self.url("/ota")).send()?;
        check(response).context("Failed to open OTA mode")?;

        let size = image.len() as u64;
        let body = Body::sized(ProgressReader::new(image, pb.clone()), size);
        let response = self
            .client
            .post(self.url("/ota/upload"))
            .header(SHA256_HEADER, sha256)
            .header("Content-Type", "application/octet-stream")
            .body(body)
            .send()?;
        Ok(check(response)?.text()?)
    }
}

pub fn base_url(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    }
}

fn check(response: reqwest::blocking::Response) -> Result<reqwest::blocking::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => bail!("HTTP {} {}: {}", status.as_u16(), body.error.code, body.error.message),
        Err(_) => bail!("HTTP {}: {}", status.as_u16(), text.trim()),
    }
}

/// Feeds the request body while advancing a progress bar
pub struct ProgressReader {
    data: std::io::Cursor<Vec<u8>>,
    pb: ProgressBar,
}

impl ProgressReader {
    pub fn new(data: Vec<u8>, pb: ProgressBar) -> Self {
        Self {
            data: std::io::Cursor::new(data),
            pb,
        }
    }
}

impl Read for ProgressReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.data.read(buf)?;
        self.pb.inc(n as u64);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url() {
        assert_eq!(base_url("192.168.1.40"), "http://192.168.1.40");
        assert_eq!(base_url("parkassist.local:8080/"), "http://parkassist.local:8080");
        assert_eq!(base_url("http://10.0.0.2"), "http://10.0.0.2");
    }

    #[test]
    fn test_progress_reader_counts_bytes() {
        let pb = ProgressBar::hidden();
        let mut reader = ProgressReader::new(vec![7u8; 10_000], pb.clone());
        let mut sink = Vec::new();
        reader.read_to_end(&mut sink).unwrap();

        assert_eq!(sink.len(), 10_000);
        assert_eq!(pb.position(), 10_000);
    }

    #[test]
    fn test_status_deserializes_from_device_json() {
        let status: UploadStatus =
            serde_json::from_str(r#"{"state":"receiving","received":512,"total":1024,"progress":50}"#).unwrap();
        assert_eq!(status, UploadStatus::receiving(512, 1024));
    }

    #[test]
    fn test_error_body_shape() {
        let body: ErrorBody = serde_json::from_str(
            r#"{"error":{"code":"UPLOAD_IN_PROGRESS","message":"busy","request_id":"req_1","timestamp":3}}"#,
        )
        .unwrap();
        assert_eq!(body.error.code, "UPLOAD_IN_PROGRESS");
        assert_eq!(body.error.message, "busy");
    }
}
