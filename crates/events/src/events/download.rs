use orchard_types::{DownloadStatus, VersionCode};
use serde::{Deserialize, Serialize};

use super::FailureContext;

/// Transfer lifecycle of a queued download
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DownloadEvent {
    Enqueued {
        package_name: String,
        version_code: VersionCode,
    },
    Started {
        package_name: String,
        version_code: VersionCode,
        total_bytes: i64,
    },
    Progress {
        package_name: String,
        progress: i32,
        speed: i64,
    },
    Finished {
        package_name: String,
        version_code: VersionCode,
        status: DownloadStatus,
    },
    Failed {
        package_name: String,
        version_code: VersionCode,
        failure: FailureContext,
    },
}
