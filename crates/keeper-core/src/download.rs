use std::path::Path;

use futures_util::StreamExt;
use log::info;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::error::EngineError;

/// Largest slice written (and reported) at once.
pub const CHUNK_SIZE: usize = 8 * 1024;

/// A progress update for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    /// Completed fraction in `[0, 1]`.
    pub fraction: f64,
    pub status: String,
}

impl Progress {
    #[must_use]
    pub fn new(fraction: f64, status: impl Into<String>) -> Self {
        Self {
            fraction: fraction.clamp(0.0, 1.0),
            status: status.into(),
        }
    }
}

pub type ProgressSender = mpsc::UnboundedSender<Progress>;

/// Stream `url` into `dest`, reporting progress after every slice when the
/// server announces a content length.
///
/// The body is never buffered whole. A partially written `dest` is left
/// behind on failure; callers place it in a scratch directory they own.
///
/// # Errors
/// Returns a network error for request/stream failures or non-success
/// statuses, and an I/O error when `dest` cannot be written.
pub async fn download(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    label: &str,
    progress: &ProgressSender,
) -> Result<u64, EngineError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|error| EngineError::http("download request failed", error))?;

    if !response.status().is_success() {
        return Err(EngineError::HttpStatus {
            context: "download",
            status: response.status(),
            body_snippet: String::new(),
        });
    }

    let total = response.content_length().filter(|total| *total > 0);
    let mut downloaded: u64 = 0;

    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|error| EngineError::io("failed to create download file", dest, error))?;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|error| EngineError::http("download stream error", error))?;
        for slice in chunk.chunks(CHUNK_SIZE) {
            file.write_all(slice)
                .await
                .map_err(|error| EngineError::io("failed to write download data", dest, error))?;
            downloaded += slice.len() as u64;

            if let Some(total) = total {
                let _ = progress.send(download_progress(label, downloaded, total));
            }
        }
    }

    file.flush()
        .await
        .map_err(|error| EngineError::io("failed to flush download file", dest, error))?;

    info!("Download complete: {downloaded} bytes");
    Ok(downloaded)
}

#[allow(clippy::cast_precision_loss)]
fn download_progress(label: &str, downloaded: u64, total: u64) -> Progress {
    let fraction = (downloaded as f64 / total as f64).min(1.0);
    Progress::new(
        fraction,
        format!("Downloading {label}... {:.0}%", fraction * 100.0),
    )
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{CHUNK_SIZE, download, download_progress};
    use crate::error::ErrorKind;

    #[test]
    fn progress_status_reports_rounded_percentage() {
        let progress = download_progress("v2.3.0", 1, 3);
        assert!((progress.fraction - 1.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(progress.status, "Downloading v2.3.0... 33%");

        let overshoot = download_progress("v2.3.0", 12, 10);
        assert!((overshoot.fraction - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn reports_non_decreasing_fractions_ending_at_one() {
        let body: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/asset.tar.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let temp = tempfile::tempdir().expect("tempdir should be created");
        let dest = temp.path().join("asset.tar.gz");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let written = download(
            &reqwest::Client::new(),
            &format!("{}/asset.tar.gz", server.uri()),
            &dest,
            "v2.3.0",
            &tx,
        )
        .await
        .expect("download should succeed");
        drop(tx);

        assert_eq!(written, body.len() as u64);
        let on_disk = std::fs::read(&dest).expect("downloaded file should exist");
        assert_eq!(on_disk.len(), body.len());
        assert_eq!(on_disk, body);

        let mut fractions = Vec::new();
        while let Some(progress) = rx.recv().await {
            fractions.push(progress.fraction);
        }
        assert!(fractions.len() >= body.len().div_ceil(CHUNK_SIZE));
        assert!(fractions.windows(2).all(|pair| pair[0] <= pair[1]));
        assert!(fractions.iter().all(|f| (0.0..=1.0).contains(f)));
        let last = fractions.last().copied().expect("progress was reported");
        assert!((last - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn unknown_length_downloads_without_progress() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let address = listener.local_addr().expect("listener has an address");
        let body: Vec<u8> = (0..20_000u32).map(|i| (i % 249) as u8).collect();
        let served = body.clone();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("client should connect");
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|window| window == b"\r\n\r\n") {
                let read = socket.read(&mut buf).await.expect("request should be read");
                if read == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..read]);
            }

            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n",
                )
                .await
                .expect("headers written");
            for part in served.chunks(5_000) {
                socket
                    .write_all(format!("{:x}\r\n", part.len()).as_bytes())
                    .await
                    .expect("chunk size written");
                socket.write_all(part).await.expect("chunk written");
                socket.write_all(b"\r\n").await.expect("chunk end written");
            }
            socket.write_all(b"0\r\n\r\n").await.expect("trailer written");
            socket.shutdown().await.expect("socket shut down");
        });

        let temp = tempfile::tempdir().expect("tempdir should be created");
        let dest = temp.path().join("asset.zip");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let written = download(
            &reqwest::Client::new(),
            &format!("http://{address}/asset.zip"),
            &dest,
            "v2.3.0",
            &tx,
        )
        .await
        .expect("download should succeed");
        server.await.expect("server task should finish");

        assert_eq!(written, body.len() as u64);
        assert_eq!(std::fs::read(&dest).expect("downloaded file should exist"), body);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn non_success_status_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let temp = tempfile::tempdir().expect("tempdir should be created");
        let (tx, _rx) = mpsc::unbounded_channel();
        let error = download(
            &reqwest::Client::new(),
            &format!("{}/missing.zip", server.uri()),
            &temp.path().join("missing.zip"),
            "v1",
            &tx,
        )
        .await
        .expect_err("404 must fail");

        assert_eq!(error.kind(), ErrorKind::Network);
        assert!(!temp.path().join("missing.zip").exists());
    }

    #[tokio::test]
    async fn unwritable_destination_is_io_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 16]))
            .mount(&server)
            .await;

        let temp = tempfile::tempdir().expect("tempdir should be created");
        let (tx, _rx) = mpsc::unbounded_channel();
        let error = download(
            &reqwest::Client::new(),
            &format!("{}/asset.zip", server.uri()),
            &temp.path().join("no-such-dir").join("asset.zip"),
            "v1",
            &tx,
        )
        .await
        .expect_err("missing parent must fail");

        assert_eq!(error.kind(), ErrorKind::Io);
    }
}
