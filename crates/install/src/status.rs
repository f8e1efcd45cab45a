//! Installer status codes and their interpretation
//!
//! Every backend reports its outcome as one of these numeric codes, the same
//! vocabulary the OS package installer uses in its completion broadcast.
//! All interpretation lives here so it can be tested without an OS.

use orchard_errors::{Error, InstallError};

pub const STATUS_PENDING_USER_ACTION: i32 = -1;
pub const STATUS_SUCCESS: i32 = 0;
pub const STATUS_FAILURE: i32 = 1;
pub const STATUS_FAILURE_BLOCKED: i32 = 2;
pub const STATUS_FAILURE_ABORTED: i32 = 3;
pub const STATUS_FAILURE_INVALID: i32 = 4;
pub const STATUS_FAILURE_CONFLICT: i32 = 5;
pub const STATUS_FAILURE_STORAGE: i32 = 6;
pub const STATUS_FAILURE_INCOMPATIBLE: i32 = 7;
pub const STATUS_FAILURE_TIMEOUT: i32 = 8;

/// Outcome class of one installer callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Success,
    PendingUserAction,
    /// The session was aborted, usually by the user dismissing the prompt
    Aborted,
    Failure,
}

/// Classify a raw status code
#[must_use]
pub fn classify(status: i32) -> InstallOutcome {
    match status {
        STATUS_SUCCESS => InstallOutcome::Success,
        STATUS_PENDING_USER_ACTION => InstallOutcome::PendingUserAction,
        STATUS_FAILURE_ABORTED => InstallOutcome::Aborted,
        _ => InstallOutcome::Failure,
    }
}

/// Human-readable error string for a status code, with the backend's own
/// message appended when it carries one
#[must_use]
pub fn error_string(status: i32, message: Option<&str>) -> String {
    let base = match status {
        STATUS_SUCCESS => "Installed".to_string(),
        STATUS_PENDING_USER_ACTION => "Installation requires confirmation".to_string(),
        STATUS_FAILURE => "Installation failed".to_string(),
        STATUS_FAILURE_BLOCKED => "Installation was blocked".to_string(),
        STATUS_FAILURE_ABORTED => "Installation was aborted".to_string(),
        STATUS_FAILURE_INVALID => "Package is invalid or corrupt".to_string(),
        STATUS_FAILURE_CONFLICT => {
            "Conflicts with an installed package of a different signature".to_string()
        }
        STATUS_FAILURE_STORAGE => "Not enough storage space".to_string(),
        STATUS_FAILURE_INCOMPATIBLE => "Incompatible with this device".to_string(),
        STATUS_FAILURE_TIMEOUT => "Installation timed out".to_string(),
        other => format!("Unknown installer status {other}"),
    };
    match message.map(str::trim).filter(|m| !m.is_empty()) {
        Some(detail) => format!("{base}: {detail}"),
        None => base,
    }
}

/// Status code reported for a backend error that never reached the OS
#[must_use]
pub fn status_for_error(error: &Error) -> i32 {
    let Error::Install(error) = error else {
        return STATUS_FAILURE;
    };
    match error {
        InstallError::PermissionDenied { .. } => STATUS_FAILURE_BLOCKED,
        InstallError::SignatureMismatch { .. } | InstallError::SessionConflict { .. } => {
            STATUS_FAILURE_CONFLICT
        }
        InstallError::InsufficientStorage { .. } => STATUS_FAILURE_STORAGE,
        InstallError::UserDeclined { .. } => STATUS_FAILURE_ABORTED,
        InstallError::NoFiles { .. } => STATUS_FAILURE_INVALID,
        _ => STATUS_FAILURE,
    }
}

/// Status code for the textual result of a `pm install-commit` shell call
#[must_use]
pub fn status_from_pm_output(output: &str) -> i32 {
    let output = output.trim();
    if output.starts_with("Success") {
        return STATUS_SUCCESS;
    }
    if output.contains("INSUFFICIENT_STORAGE") {
        STATUS_FAILURE_STORAGE
    } else if output.contains("UPDATE_INCOMPATIBLE")
        || output.contains("SIGNATURE")
        || output.contains("NO_CERTIFICATES")
        || output.contains("CONFLICTING_PROVIDER")
    {
        STATUS_FAILURE_CONFLICT
    } else if output.contains("INSTALL_FAILED_ABORTED") {
        STATUS_FAILURE_ABORTED
    } else if output.contains("INSTALL_PARSE_FAILED") || output.contains("INVALID_APK") {
        STATUS_FAILURE_INVALID
    } else if output.contains("OLDER_SDK")
        || output.contains("NO_MATCHING_ABIS")
        || output.contains("MISSING_SPLIT")
    {
        STATUS_FAILURE_INCOMPATIBLE
    } else {
        STATUS_FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify(STATUS_SUCCESS), InstallOutcome::Success);
        assert_eq!(
            classify(STATUS_PENDING_USER_ACTION),
            InstallOutcome::PendingUserAction
        );
        assert_eq!(classify(STATUS_FAILURE_ABORTED), InstallOutcome::Aborted);
        for code in [1, 2, 4, 5, 6, 7, 8, 42, -7] {
            assert_eq!(classify(code), InstallOutcome::Failure, "code {code}");
        }
    }

    #[test]
    fn test_error_string_appends_message() {
        assert_eq!(
            error_string(STATUS_FAILURE_STORAGE, None),
            "Not enough storage space"
        );
        assert_eq!(
            error_string(STATUS_FAILURE, Some("INSTALL_FAILED_INTERNAL_ERROR")),
            "Installation failed: INSTALL_FAILED_INTERNAL_ERROR"
        );
        assert_eq!(error_string(STATUS_FAILURE, Some("  ")), "Installation failed");
        assert_eq!(error_string(99, None), "Unknown installer status 99");
    }

    #[test]
    fn test_pm_output_mapping() {
        assert_eq!(status_from_pm_output("Success\n"), STATUS_SUCCESS);
        assert_eq!(
            status_from_pm_output("Failure [INSTALL_FAILED_INSUFFICIENT_STORAGE]"),
            STATUS_FAILURE_STORAGE
        );
        assert_eq!(
            status_from_pm_output("Failure [INSTALL_FAILED_UPDATE_INCOMPATIBLE: sig]"),
            STATUS_FAILURE_CONFLICT
        );
        assert_eq!(
            status_from_pm_output("Failure [INSTALL_FAILED_ABORTED: User rejected]"),
            STATUS_FAILURE_ABORTED
        );
        assert_eq!(
            status_from_pm_output("Failure [INSTALL_FAILED_NO_MATCHING_ABIS]"),
            STATUS_FAILURE_INCOMPATIBLE
        );
        assert_eq!(status_from_pm_output("something odd"), STATUS_FAILURE);
    }

    #[test]
    fn test_status_for_error() {
        let declined = Error::from(InstallError::UserDeclined {
            package: "a".into(),
        });
        assert_eq!(status_for_error(&declined), STATUS_FAILURE_ABORTED);
        let io = Error::from(InstallError::Io {
            package: "a".into(),
            message: "broken pipe".into(),
        });
        assert_eq!(status_for_error(&io), STATUS_FAILURE);
        assert_eq!(status_for_error(&Error::Cancelled), STATUS_FAILURE);
    }
}
