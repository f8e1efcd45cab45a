//! Integration tests for error types

#[cfg(test)]
mod tests {
    use orchard_errors::*;

    #[test]
    fn test_error_conversion() {
        let net_err = NetworkError::Timeout {
            url: "https://example.com".into(),
        };
        let err: Error = net_err.into();
        assert!(matches!(err, Error::Network(_)));
    }

    #[test]
    fn test_error_display() {
        let err = InstallError::SignatureMismatch {
            package: "com.example.foo".into(),
        };
        assert_eq!(err.to_string(), "signature mismatch for com.example.foo");
    }

    #[test]
    fn test_storage_error_classifies_io_kind() {
        let dir = std::path::Path::new("/data/downloads/com.example.foo/5");
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(
            StorageError::at(dir, &denied),
            StorageError::PermissionDenied { .. }
        ));

        let full = std::io::Error::new(std::io::ErrorKind::StorageFull, "full");
        let err: Error = StorageError::at(dir, &full).into();
        assert_eq!(err.user_code(), Some("storage.disk_full"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_io_error_keeps_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        let err = Error::io_with_path(&io_err, "/data/downloads/base.apk");
        assert_eq!(err.to_string(), "/data/downloads/base.apk: short read");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_busy_database_is_retryable() {
        let err: Error = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, Error::State(StateError::Busy { .. })));
        assert!(err.is_retryable());

        let err: Error = sqlx::Error::RowNotFound.into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_cancelled() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::internal("boom").is_cancelled());
    }

    #[test]
    fn test_user_facing_codes() {
        let err: Error = InstallError::InsufficientStorage {
            package: "com.example.foo".into(),
        }
        .into();
        assert_eq!(err.user_code(), Some("install.insufficient_storage"));
        assert!(err.user_hint().is_some());
        assert!(!err.is_retryable());

        let err: Error = NetworkError::HttpError {
            status: 503,
            message: "unavailable".into(),
        }
        .into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_status_transition_message() {
        let err = StateError::InvalidTransition {
            package: "com.example.foo".into(),
            from: "COMPLETED".into(),
            to: "DOWNLOADING".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid status transition for com.example.foo from COMPLETED to DOWNLOADING"
        );
    }
}
