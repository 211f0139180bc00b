//! Upload execution with bounded retry
//!
//! One logical upload moves through
//! `acquire credentials -> attempt -> {success, fatal, retry, exhausted}`.
//! The retry decision comes from [`crate::retry::decide`]; this module only
//! runs it. Attempts never overlap.

use std::sync::Arc;

use bytes::Bytes;

use crate::cancel::CancelToken;
use crate::config::RetryConfig;
use crate::error::{Error, Result, TransportError};
use crate::retry::{Decision, decide};
use crate::traits::{SessionStore, Transport};
use crate::types::{FileVersionInfo, UploadDestination, UploadSource};

/// Drives uploads through a [`Transport`], caching credentials in a [`SessionStore`]
pub struct UploadEngine<T: ?Sized, S: ?Sized> {
    transport: Arc<T>,
    sessions: Arc<S>,
    retry: RetryConfig,
}

impl<T, S> UploadEngine<T, S>
where
    T: Transport + ?Sized,
    S: SessionStore + ?Sized,
{
    pub fn new(transport: Arc<T>, sessions: Arc<S>, retry: RetryConfig) -> Self {
        Self {
            transport,
            sessions,
            retry,
        }
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Upload `source` as a new version of `file_name`
    ///
    /// Fails with [`Error::FatalUpload`] on the first non-retryable failure and
    /// with [`Error::MaxRetriesExceeded`] once the retry budget is spent.
    pub async fn upload(
        &self,
        bucket_id: &str,
        source: UploadSource,
        file_name: &str,
        cancel: Option<&CancelToken>,
    ) -> Result<FileVersionInfo> {
        let data = source.read().await?;
        let mut failures = 0u32;

        loop {
            if cancel.is_some_and(CancelToken::is_cancelled) {
                return Err(Error::Cancelled);
            }

            let outcome = self.attempt(bucket_id, file_name, data.clone()).await;
            if outcome.is_err() {
                failures += 1;
            }
            if outcome.as_ref().is_err_and(TransportError::should_retry) {
                // The endpoint or token may have expired
                self.sessions.invalidate_upload_destination(bucket_id);
            }

            match (decide(&self.retry, &outcome, failures), outcome) {
                (_, Ok(info)) => {
                    tracing::info!(
                        bucket_id,
                        file_name,
                        file_id = %info.id,
                        attempts = failures + 1,
                        "Upload complete"
                    );
                    return Ok(info);
                }
                (Decision::Retry(backoff), Err(source)) => {
                    tracing::warn!(
                        bucket_id,
                        file_name,
                        attempt = failures,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %source,
                        "Retrying upload after transient error"
                    );

                    match cancel {
                        Some(token) => {
                            tokio::select! {
                                _ = tokio::time::sleep(backoff) => {}
                                _ = token.cancelled() => return Err(Error::Cancelled),
                            }
                        }
                        None => tokio::time::sleep(backoff).await,
                    }
                }
                (Decision::FailExhausted, Err(source)) => {
                    tracing::warn!(
                        bucket_id,
                        file_name,
                        attempts = failures,
                        error = %source,
                        "Upload retries exhausted"
                    );
                    return Err(Error::MaxRetriesExceeded {
                        attempts: failures,
                        source,
                    });
                }
                (Decision::FailFatal, Err(source)) => {
                    tracing::debug!(
                        bucket_id,
                        file_name,
                        error = %source,
                        "Upload failed with a non-retryable error"
                    );
                    return Err(Error::FatalUpload { source });
                }
                (Decision::Succeed, Err(_)) => {
                    unreachable!("decide() returns Succeed only for Ok outcomes")
                }
            }
        }
    }

    async fn attempt(
        &self,
        bucket_id: &str,
        file_name: &str,
        data: Bytes,
    ) -> std::result::Result<FileVersionInfo, TransportError> {
        let destination = self.destination(bucket_id).await?;
        self.transport.upload_file(&destination, file_name, data).await
    }

    async fn destination(
        &self,
        bucket_id: &str,
    ) -> std::result::Result<UploadDestination, TransportError> {
        if let Some(destination) = self.sessions.get_upload_destination(bucket_id) {
            return Ok(destination);
        }

        tracing::debug!(bucket_id, "Requesting upload URL");
        let destination = self.transport.get_upload_url(bucket_id).await?;
        self.sessions.set_upload_destination(bucket_id, destination.clone());
        Ok(destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryBuilder;
    use crate::session::InMemorySessionStore;
    use crate::traits::MockSessionStore;
    use crate::types::{FileAction, ListingPage};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails uploads with queued errors, then succeeds
    #[derive(Default)]
    struct FakeTransport {
        upload_errors: Mutex<VecDeque<TransportError>>,
        url_errors: Mutex<VecDeque<TransportError>>,
        upload_calls: AtomicU32,
        url_calls: AtomicU32,
    }

    impl FakeTransport {
        fn with_upload_errors(errors: Vec<TransportError>) -> Self {
            Self {
                upload_errors: Mutex::new(errors.into()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn list_file_versions(
            &self,
            _bucket_id: &str,
            _prefix: &str,
            _start_file_name: Option<&str>,
            _start_file_id: Option<&str>,
            _max_count: usize,
        ) -> std::result::Result<ListingPage, TransportError> {
            Ok(ListingPage::default())
        }

        async fn get_upload_url(
            &self,
            bucket_id: &str,
        ) -> std::result::Result<UploadDestination, TransportError> {
            let n = self.url_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.url_errors.lock().unwrap().pop_front() {
                return Err(err);
            }
            Ok(UploadDestination {
                url: format!("https://upload.example.com/{bucket_id}/{n}"),
                token: format!("token-{n}"),
            })
        }

        async fn upload_file(
            &self,
            _destination: &UploadDestination,
            file_name: &str,
            data: Bytes,
        ) -> std::result::Result<FileVersionInfo, TransportError> {
            self.upload_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.upload_errors.lock().unwrap().pop_front() {
                return Err(err);
            }
            Ok(FileVersionInfo {
                id: "9999".to_string(),
                file_name: file_name.to_string(),
                size: data.len() as u64,
                action: FileAction::Upload,
                upload_timestamp: 0,
            })
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryBuilder::new()
            .initial_backoff_ms(1)
            .max_backoff_ms(4)
            .build()
    }

    fn engine(transport: Arc<FakeTransport>) -> UploadEngine<FakeTransport, InMemorySessionStore> {
        UploadEngine::new(transport, Arc::new(InMemorySessionStore::new()), fast_retry())
    }

    fn hello() -> UploadSource {
        UploadSource::Bytes(Bytes::from_static(b"hello world"))
    }

    #[tokio::test]
    async fn test_upload_first_attempt() {
        let transport = Arc::new(FakeTransport::default());
        let info = engine(transport.clone())
            .upload("bucket", hello(), "file1", None)
            .await
            .unwrap();

        assert_eq!(info.size, 11);
        assert_eq!(transport.upload_calls.load(Ordering::SeqCst), 1);
        assert_eq!(transport.url_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_one_retryable_error() {
        let transport = Arc::new(FakeTransport::with_upload_errors(vec![
            TransportError::transient("503"),
        ]));
        engine(transport.clone())
            .upload("bucket", hello(), "file1", None)
            .await
            .unwrap();

        assert_eq!(transport.upload_calls.load(Ordering::SeqCst), 2);
        // Credentials are re-acquired after the transient failure
        assert_eq!(transport.url_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fatal_error_not_retried() {
        let transport = Arc::new(FakeTransport::with_upload_errors(vec![
            TransportError::fatal("bad request"),
        ]));
        let err = engine(transport.clone())
            .upload("bucket", hello(), "file1", None)
            .await
            .unwrap_err();

        assert!(
            matches!(err, Error::FatalUpload { ref source } if source.message == "bad request")
        );
        assert_eq!(transport.upload_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_five_retryable_errors_then_success() {
        let transport = Arc::new(FakeTransport::with_upload_errors(vec![
            TransportError::transient("timeout");
            5
        ]));
        engine(transport.clone())
            .upload("bucket", hello(), "file1", None)
            .await
            .unwrap();
        assert_eq!(transport.upload_calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_too_many_retryable_errors() {
        let mut errors = vec![TransportError::transient("timeout"); 5];
        errors.push(TransportError::transient("last"));
        let transport = Arc::new(FakeTransport::with_upload_errors(errors));

        let err = engine(transport.clone())
            .upload("bucket", hello(), "file1", None)
            .await
            .unwrap_err();

        match err {
            Error::MaxRetriesExceeded { attempts, source } => {
                assert_eq!(attempts, 6);
                assert_eq!(source.message, "last");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.upload_calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_credential_failure_counts_as_attempt() {
        let transport = Arc::new(FakeTransport {
            url_errors: Mutex::new(vec![TransportError::transient("busy")].into()),
            ..Default::default()
        });
        engine(transport.clone())
            .upload("bucket", hello(), "file1", None)
            .await
            .unwrap();

        assert_eq!(transport.url_calls.load(Ordering::SeqCst), 2);
        assert_eq!(transport.upload_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cached_destination_reused() {
        let transport = Arc::new(FakeTransport::default());
        let mut sessions = MockSessionStore::new();
        sessions
            .expect_get_upload_destination()
            .withf(|bucket_id| bucket_id == "bucket")
            .times(2)
            .returning(|_| {
                Some(UploadDestination {
                    url: "https://cached".to_string(),
                    token: "cached".to_string(),
                })
            });
        sessions.expect_set_upload_destination().never();

        let engine = UploadEngine::new(transport.clone(), Arc::new(sessions), fast_retry());
        engine.upload("bucket", hello(), "a", None).await.unwrap();
        engine.upload("bucket", hello(), "b", None).await.unwrap();

        assert_eq!(transport.url_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_retry_invalidates_destination() {
        let transport = Arc::new(FakeTransport::with_upload_errors(vec![
            TransportError::from_status(401, Some("expired_auth_token"), "expired"),
        ]));
        let mut sessions = MockSessionStore::new();
        let mut seq = mockall::Sequence::new();
        sessions
            .expect_get_upload_destination()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Some(UploadDestination {
                    url: "https://stale".to_string(),
                    token: "stale".to_string(),
                })
            });
        sessions
            .expect_invalidate_upload_destination()
            .withf(|bucket_id| bucket_id == "bucket")
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        sessions
            .expect_get_upload_destination()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| None);
        sessions
            .expect_set_upload_destination()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());

        let engine = UploadEngine::new(transport.clone(), Arc::new(sessions), fast_retry());
        engine.upload("bucket", hello(), "file1", None).await.unwrap();

        assert_eq!(transport.url_calls.load(Ordering::SeqCst), 1);
        assert_eq!(transport.upload_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fatal_does_not_invalidate() {
        let transport = Arc::new(FakeTransport::with_upload_errors(vec![
            TransportError::fatal("denied"),
        ]));
        let mut sessions = MockSessionStore::new();
        sessions.expect_get_upload_destination().returning(|_| None);
        sessions.expect_set_upload_destination().return_const(());
        sessions.expect_invalidate_upload_destination().never();

        let engine = UploadEngine::new(transport, Arc::new(sessions), fast_retry());
        assert!(engine.upload("bucket", hello(), "f", None).await.is_err());
    }

    #[tokio::test]
    async fn test_exhausted_retries_invalidate_every_failure() {
        let transport = Arc::new(FakeTransport::with_upload_errors(vec![
            TransportError::transient("timeout");
            6
        ]));
        let mut sessions = MockSessionStore::new();
        sessions.expect_get_upload_destination().returning(|_| None);
        sessions.expect_set_upload_destination().return_const(());
        sessions
            .expect_invalidate_upload_destination()
            .withf(|bucket_id| bucket_id == "bucket")
            .times(6)
            .return_const(());

        let engine = UploadEngine::new(transport.clone(), Arc::new(sessions), fast_retry());
        let err = engine.upload("bucket", hello(), "f", None).await.unwrap_err();

        assert!(matches!(err, Error::MaxRetriesExceeded { attempts: 6, .. }));
        assert_eq!(transport.upload_calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_exhausted_retries_leave_no_cached_destination() {
        let transport = Arc::new(FakeTransport::with_upload_errors(vec![
            TransportError::transient("timeout");
            6
        ]));
        let sessions = Arc::new(InMemorySessionStore::new());
        let engine = UploadEngine::new(transport.clone(), sessions.clone(), fast_retry());

        assert!(engine.upload("bucket", hello(), "f", None).await.is_err());
        assert!(sessions.get_upload_destination("bucket").is_none());

        // The next upload starts from fresh credentials
        engine.upload("bucket", hello(), "f", None).await.unwrap();
        assert_eq!(transport.url_calls.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let transport = Arc::new(FakeTransport::with_upload_errors(vec![
            TransportError::transient("timeout"),
        ]));
        let engine = UploadEngine::new(
            transport.clone(),
            Arc::new(InMemorySessionStore::new()),
            RetryBuilder::new()
                .initial_backoff_ms(60_000)
                .max_backoff_ms(60_000)
                .build(),
        );
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            engine.upload("bucket", hello(), "file1", Some(&cancel)),
        )
        .await
        .expect("cancellation should interrupt the backoff sleep");

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(transport.upload_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_first_attempt() {
        let transport = Arc::new(FakeTransport::default());
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = engine(transport.clone())
            .upload("bucket", hello(), "file1", Some(&cancel))
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(transport.upload_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unreadable_source() {
        let transport = Arc::new(FakeTransport::default());
        let dir = tempfile::tempdir().unwrap();
        let result = engine(transport.clone())
            .upload(
                "bucket",
                UploadSource::LocalFile(dir.path().join("missing")),
                "file1",
                None,
            )
            .await;

        assert!(matches!(result, Err(Error::Io(_))));
        assert_eq!(transport.upload_calls.load(Ordering::SeqCst), 0);
    }
}
