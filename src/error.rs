//! Error types for the capture-and-stitch pipeline
//!
//! This module defines the error kinds a capture request can fail with,
//! plus a `user_message()` helper that builds the single user-facing alert
//! shown when a request aborts. Every fatal path funnels through the
//! pipeline's cleanup routine before one of these surfaces.

use crate::model::TabId;

/// Result type alias for pipeline operations
pub type StitchResult<T> = Result<T, StitchError>;

/// Error type for capture, stitch, and delivery operations
#[derive(Debug, thiserror::Error)]
pub enum StitchError {
    /// Composite buffer allocation would exceed the safe byte ceiling.
    ///
    /// Raised before any capture is issued; no partial output is created.
    #[error("Requested region {width}x{height} needs {bytes} bytes, above the allocation ceiling")]
    ImageTooLarge {
        /// Region width in pixels
        width:  u32,
        /// Region height in pixels
        height: u32,
        /// Bytes the raw RGBA buffer would require
        bytes:  u64,
    },

    /// Another capture already holds this tab's lock.
    ///
    /// Overlapping requests on the same tab are dropped, not queued; a
    /// stale duplicate capture is not meaningful to the user.
    #[error("A capture is already running on tab {tab}")]
    CaptureInProgress {
        /// Tab whose capture lock was held
        tab: TabId,
    },

    /// The platform capture primitive rejected a tile capture
    #[error("Capture call failed: {reason}")]
    CaptureFailed {
        /// Reason reported by the platform
        reason: String,
    },

    /// A captured tile image could not be decoded
    #[error("Failed to decode captured tile: {reason}")]
    DecodeFailed {
        /// Decoder error text
        reason: String,
    },

    /// Encoding the composited image failed
    #[error("Failed to encode image as {format}: {reason}")]
    EncodingFailed {
        /// Output format that failed
        format: String,
        /// Reason for the failure
        reason: String,
    },

    /// A named lock could not be acquired within its window
    #[error("Timed out after {duration_ms}ms waiting for lock '{key}'")]
    LockTimeout {
        /// Lock key that stayed contended
        key:         String,
        /// How long the acquirer waited
        duration_ms: u64,
    },

    /// A managed download was interrupted before completion
    #[error("Download of '{filename}' was interrupted")]
    DownloadInterrupted {
        /// Intended output filename
        filename: String,
    },

    /// Script execution in the page context failed
    #[error("Page script failed: {reason}")]
    PageScriptFailed {
        /// Reason reported by the script host
        reason: String,
    },

    /// Writing the encoded image to the clipboard failed
    #[error("Clipboard write failed: {reason}")]
    ClipboardFailed {
        /// Reason reported by the clipboard sink
        reason: String,
    },

    /// The capture request itself is malformed
    #[error("Invalid capture request: {reason}")]
    InvalidRequest {
        /// What was wrong with the request
        reason: String,
    },

    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StitchError {
    /// Builds the single user-facing alert line for an aborted request.
    ///
    /// The filename gives the user context for which capture failed, even
    /// when the failure happened before any file existed.
    ///
    /// # Examples
    ///
    /// ```
    /// use pagestitch::error::StitchError;
    ///
    /// let err = StitchError::DownloadInterrupted {
    ///     filename: "page.png".to_string(),
    /// };
    /// let msg = err.user_message("page.png");
    /// assert!(msg.contains("page.png"));
    /// ```
    pub fn user_message(&self, filename: &str) -> String {
        match self {
            StitchError::ImageTooLarge { width, height, .. } => {
                format!(
                    "Could not save '{filename}': the {width}x{height} capture is too large to \
                     assemble. Try a smaller region or a lower scale."
                )
            }
            StitchError::CaptureInProgress { tab } => {
                format!("Could not save '{filename}': tab {tab} is already being captured.")
            }
            _ => format!("Could not save '{filename}': {self}"),
        }
    }

    /// True for failures that occur before any page state was touched
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            StitchError::ImageTooLarge { .. }
                | StitchError::CaptureInProgress { .. }
                | StitchError::InvalidRequest { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_too_large_message() {
        let err = StitchError::ImageTooLarge {
            width:  100_000,
            height: 100_000,
            bytes:  40_000_000_000,
        };

        let msg = err.to_string();
        assert!(msg.contains("100000x100000"));
        assert!(msg.contains("40000000000"));

        let user = err.user_message("shot.png");
        assert!(user.contains("shot.png"));
        assert!(user.contains("too large"));
    }

    #[test]
    fn test_capture_in_progress_message() {
        let err = StitchError::CaptureInProgress { tab: TabId(7) };

        assert!(err.to_string().contains("tab 7"));
        assert!(err.is_precondition());
    }

    #[test]
    fn test_lock_timeout_message() {
        let err = StitchError::LockTimeout {
            key:         "encode-worker".to_string(),
            duration_ms: 900_000,
        };

        let msg = err.to_string();
        assert!(msg.contains("encode-worker"));
        assert!(msg.contains("900000"));
        assert!(!err.is_precondition());
    }

    #[test]
    fn test_download_interrupted_user_message() {
        let err = StitchError::DownloadInterrupted {
            filename: "capture-001.png".to_string(),
        };

        let user = err.user_message("capture-001.png");
        assert!(user.contains("capture-001.png"));
        assert!(user.contains("interrupted"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: StitchError = io.into();
        assert!(err.to_string().contains("I/O error"));
    }
}
