//! モデルファイルの解決
//!
//! ローカルにモデルがあればそのまま使い、無ければ設定されたURLから一度だけ取得します。
//! 取得したデータは同じディレクトリの一時ファイルに書き込み、完了後にリネームするため、
//! 中断されたダウンロードが「解決済み」のファイルとして残ることはありません。

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{InspectionError, Result};

/// 解決結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// 読み込み可能なモデルファイル
    Resolved(PathBuf),
    /// ローカルファイルも取得元URLも無い
    Unavailable,
}

impl Resolution {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Resolution::Resolved(path) => Some(path),
            Resolution::Unavailable => None,
        }
    }

    /// `Unavailable` を `ModelUnavailable` エラーに変換する
    pub fn into_path(self, model_path: &Path) -> Result<PathBuf> {
        match self {
            Resolution::Resolved(path) => Ok(path),
            Resolution::Unavailable => Err(InspectionError::ModelUnavailable {
                path: model_path.to_path_buf(),
            }),
        }
    }
}

/// リモートのモデルを取得する
pub trait ModelFetcher: Send + Sync {
    /// `url` の内容をすべて `sink` に書き込み、書き込んだバイト数を返す
    fn fetch(&self, url: &str, sink: &mut dyn Write) -> Result<u64>;
}

/// ブロッキングHTTPクライアントによる取得
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    /// タイムアウト無しのクライアント
    pub fn new() -> Result<Self> {
        Self::build(None)
    }

    /// 取得全体の所要時間に上限を設ける
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        Self::build(Some(timeout))
    }

    fn build(timeout: Option<Duration>) -> Result<Self> {
        // None は無制限（blocking クライアントの既定値30秒を上書きする）
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("solder_qc/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| InspectionError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl ModelFetcher for HttpFetcher {
    fn fetch(&self, url: &str, sink: &mut dyn Write) -> Result<u64> {
        info!("Downloading model from {}", url);
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| InspectionError::fetch(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(InspectionError::fetch(url, format!("HTTP status {}", status)));
        }

        let written = std::io::copy(&mut response, sink).map_err(|e| InspectionError::fetch(url, e))?;
        debug!("Downloaded {} bytes from {}", written, url);
        Ok(written)
    }
}

/// モデルリゾルバ
pub struct ModelResolver<F: ModelFetcher = HttpFetcher> {
    fetcher: F,
}

impl ModelResolver<HttpFetcher> {
    pub fn http() -> Result<Self> {
        Ok(Self::new(HttpFetcher::new()?))
    }
}

impl<F: ModelFetcher> ModelResolver<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// モデルファイルを解決する
    ///
    /// - `model_path` が存在すればネットワークに触れずにそのまま返す
    /// - 存在せず `model_url` も無ければ `Unavailable`（ファイル書き込みなし）
    /// - それ以外はURLから取得して `model_path` に原子的に配置する
    pub fn resolve(&self, model_path: &Path, model_url: Option<&str>) -> Result<Resolution> {
        if model_path.exists() {
            debug!("Model already present at {}", model_path.display());
            return Ok(Resolution::Resolved(model_path.to_path_buf()));
        }

        let Some(url) = model_url.filter(|u| !u.trim().is_empty()) else {
            warn!("Model not found at {} and no model_url configured", model_path.display());
            return Ok(Resolution::Unavailable);
        };

        self.download(model_path, url)?;
        Ok(Resolution::Resolved(model_path.to_path_buf()))
    }

    fn download(&self, model_path: &Path, url: &str) -> Result<()> {
        let parent = match model_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)?;

        // 同一ファイルシステム上の一時ファイルに書き込み、成功時のみリネーム
        let mut temp = NamedTempFile::new_in(&parent)?;
        let written = self.fetcher.fetch(url, temp.as_file_mut())?;
        if written == 0 {
            return Err(InspectionError::fetch(url, "empty response body"));
        }
        temp.flush()?;
        temp.as_file().sync_all()?;

        temp.persist(model_path).map_err(|e| InspectionError::Io(e.error))?;
        info!("Saved model ({} bytes) to {}", written, model_path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 呼び出し回数を数える固定レスポンスの取得器
    struct CountingFetcher {
        calls: AtomicUsize,
        body: Vec<u8>,
        fail: bool,
    }

    impl CountingFetcher {
        fn serving(body: &[u8]) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                body: body.to_vec(),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                body: Vec::new(),
                fail: true,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ModelFetcher for CountingFetcher {
        fn fetch(&self, url: &str, sink: &mut dyn Write) -> Result<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                // 途中まで書き込んでから失敗する
                sink.write_all(b"partial")?;
                return Err(InspectionError::fetch(url, "connection reset"));
            }
            sink.write_all(&self.body)?;
            Ok(self.body.len() as u64)
        }
    }

    fn dir_entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
    }

    #[test]
    fn test_existing_path_skips_network() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.tar.gz");
        std::fs::write(&path, b"weights").unwrap();

        let resolver = ModelResolver::new(CountingFetcher::serving(b"remote"));
        for _ in 0..3 {
            let resolution = resolver
                .resolve(&path, Some("https://example.com/model.tar.gz"))
                .unwrap();
            assert_eq!(resolution, Resolution::Resolved(path.clone()));
        }
        assert_eq!(resolver.fetcher().calls(), 0);
        assert_eq!(std::fs::read(&path).unwrap(), b"weights");
    }

    #[test]
    fn test_missing_without_url_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models/model.tar.gz");

        let resolver = ModelResolver::new(CountingFetcher::serving(b"remote"));
        let resolution = resolver.resolve(&path, None).unwrap();

        assert_eq!(resolution, Resolution::Unavailable);
        assert_eq!(resolver.fetcher().calls(), 0);
        assert!(!dir.path().join("models").exists());
        assert_eq!(dir_entries(dir.path()), 0);

        let err = resolution.into_path(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ModelUnavailable);
    }

    #[test]
    fn test_downloads_once_and_writes_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models/nested/model.tar.gz");
        let resolver = ModelResolver::new(CountingFetcher::serving(b"remote weights"));

        let first = resolver
            .resolve(&path, Some("https://example.com/model.tar.gz"))
            .unwrap();
        let second = resolver
            .resolve(&path, Some("https://example.com/model.tar.gz"))
            .unwrap();

        assert_eq!(first, Resolution::Resolved(path.clone()));
        assert_eq!(second, first);
        assert_eq!(resolver.fetcher().calls(), 1);
        assert_eq!(std::fs::read(&path).unwrap(), b"remote weights");
        // 一時ファイルは残らない
        assert_eq!(dir_entries(path.parent().unwrap()), 1);
    }

    #[test]
    fn test_failed_download_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.tar.gz");
        let resolver = ModelResolver::new(CountingFetcher::failing());

        let err = resolver
            .resolve(&path, Some("https://example.com/model.tar.gz"))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ModelFetch);
        assert!(!path.exists());
        assert_eq!(dir_entries(dir.path()), 0);
    }

    #[test]
    fn test_empty_body_is_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.tar.gz");
        let resolver = ModelResolver::new(CountingFetcher::serving(b""));

        let err = resolver
            .resolve(&path, Some("https://example.com/model.tar.gz"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ModelFetch);
        assert!(!path.exists());
    }

    /// 1回だけ応答するローカルHTTPサーバ
    fn serve_once(status_line: &'static str, body: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut line = String::new();
                // リクエストヘッダを読み捨てる
                while reader.read_line(&mut line).map(|n| n > 0).unwrap_or(false) {
                    if line == "\r\n" {
                        break;
                    }
                    line.clear();
                }
                let header = format!(
                    "{}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status_line,
                    body.len()
                );
                stream.write_all(header.as_bytes()).unwrap();
                stream.write_all(body).unwrap();
                stream.flush().unwrap();
            }
        });
        format!("http://{}/model.tar.gz", addr)
    }

    #[test]
    fn test_http_fetcher_downloads_body() {
        let url = serve_once("HTTP/1.1 200 OK", b"bundle bytes");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.tar.gz");

        let resolver = ModelResolver::http().unwrap();
        let resolution = resolver.resolve(&path, Some(&url)).unwrap();

        assert_eq!(resolution, Resolution::Resolved(path.clone()));
        assert_eq!(std::fs::read(&path).unwrap(), b"bundle bytes");
    }

    #[test]
    fn test_http_fetcher_rejects_non_success_status() {
        let url = serve_once("HTTP/1.1 404 Not Found", b"missing");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.tar.gz");

        let resolver = ModelResolver::new(HttpFetcher::with_timeout(Duration::from_secs(10)).unwrap());
        let err = resolver.resolve(&path, Some(&url)).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ModelFetch);
        assert!(err.to_string().contains("404"));
        assert!(!path.exists());
    }
}
