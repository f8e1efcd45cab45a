//! Integration tests for net crate

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use orchard_errors::{Error, NetworkError};
    use orchard_net::*;
    use orchard_types::DownloadFile;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;

    fn client() -> NetClient {
        NetClient::new(NetConfig {
            retry_count: 1,
            retry_delay: Duration::from_millis(10),
            ..NetConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_http_reports_progress() {
        let server = MockServer::start();
        let content = b"test apk content";
        let mock = server.mock(|when, then| {
            when.method(GET).path("/base.apk");
            then.status(200)
                .header("content-length", content.len().to_string())
                .body(content);
        });

        let temp = tempdir().unwrap();
        let dest = temp.path().join("base.apk");
        let fetcher = HttpFetcher::new(client());
        let seen = AtomicU64::new(0);
        let file = DownloadFile::new("base.apk", server.url("/base.apk"), content.len() as i64);

        let written = fetcher
            .fetch(&file, &dest, &CancellationToken::new(), &|n| {
                seen.fetch_add(n, Ordering::SeqCst);
            })
            .await
            .unwrap();

        mock.assert();
        assert_eq!(written, content.len() as u64);
        assert_eq!(seen.load(Ordering::SeqCst), content.len() as u64);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), content);
    }

    #[tokio::test]
    async fn test_fetch_http_error_status() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/missing.apk");
            then.status(404);
        });

        let temp = tempdir().unwrap();
        let fetcher = HttpFetcher::new(client());
        let file = DownloadFile::new("missing.apk", server.url("/missing.apk"), 0);

        let err = fetcher
            .fetch(
                &file,
                &temp.path().join("missing.apk"),
                &CancellationToken::new(),
                &|_| {},
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Network(NetworkError::HttpError { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_local_file() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("source.apk");
        std::fs::write(&source, vec![7u8; 200_000]).unwrap();
        let dest = temp.path().join("copy.apk");

        let file = DownloadFile::new("copy.apk", format!("file://{}", source.display()), 0);
        let fetcher = HttpFetcher::new(client());
        let written = fetcher
            .fetch(&file, &dest, &CancellationToken::new(), &|_| {})
            .await
            .unwrap();

        assert_eq!(written, 200_000);
        assert_eq!(sha256_file(&dest).await.unwrap(), sha256_file(&source).await.unwrap());
    }

    #[tokio::test]
    async fn test_fetch_cancelled() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("source.apk");
        std::fs::write(&source, b"data").unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let file = DownloadFile::new("copy.apk", format!("file://{}", source.display()), 0);
        let err = HttpFetcher::new(client())
            .fetch(&file, &temp.path().join("copy.apk"), &cancel, &|_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_fetch_rejects_unknown_scheme() {
        let temp = tempdir().unwrap();
        let file = DownloadFile::new("x.apk", "ftp://example.org/x.apk", 0);
        let err = HttpFetcher::new(client())
            .fetch(&file, &temp.path().join("x.apk"), &CancellationToken::new(), &|_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Network(NetworkError::InvalidUrl(_))));
    }
}
