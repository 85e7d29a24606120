//! Error types for TernDB.

use crate::page::PageId;
use crate::types::AttrType;
use thiserror::Error;

/// Result type alias using TernError.
pub type Result<T> = std::result::Result<T, TernError>;

/// Errors that can occur in TernDB operations.
#[derive(Debug, Error)]
pub enum TernError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("file already exists: {0}")]
    FileExists(String),

    // Storage errors
    #[error("page not found: {0}")]
    PageNotFound(PageId),

    #[error("page corrupted: {page_id}, reason: {reason}")]
    PageCorrupted { page_id: PageId, reason: String },

    #[error("buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    #[error("page full, unable to insert record")]
    PageFull,

    #[error("record not found: {page_num}:{slot}")]
    RecordNotFound { page_num: u32, slot: u16 },

    // Index errors
    #[error("index metadata mismatch for {0}")]
    BadIndexInfo(String),

    #[error("bad scan opcodes: lower bound takes GT/GTE, upper bound takes LT/LTE")]
    BadOpcodes,

    #[error("bad scan range: high value {high} is below low value {low}")]
    BadScanRange { low: i32, high: i32 },

    #[error("no key found in the scan range")]
    NoSuchKeyFound,

    #[error("scan not initialized")]
    ScanNotInitialized,

    #[error("index scan completed")]
    IndexScanCompleted,

    #[error("unsupported attribute type for index: {0}")]
    UnsupportedAttrType(AttrType),

    // Internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: TernError = io_err.into();
        assert!(matches!(err, TernError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_page_not_found_display() {
        let err = TernError::PageNotFound(PageId::new(1, 42));
        assert_eq!(err.to_string(), "page not found: 1:42");
    }

    #[test]
    fn test_page_corrupted_display() {
        let err = TernError::PageCorrupted {
            page_id: PageId::new(0, 0),
            reason: "bad magic".to_string(),
        };
        assert_eq!(err.to_string(), "page corrupted: 0:0, reason: bad magic");
    }

    #[test]
    fn test_index_error_display() {
        let err = TernError::BadIndexInfo("rel.4".to_string());
        assert_eq!(err.to_string(), "index metadata mismatch for rel.4");

        let err = TernError::BadScanRange { low: 10, high: 5 };
        assert_eq!(
            err.to_string(),
            "bad scan range: high value 5 is below low value 10"
        );

        assert_eq!(
            TernError::NoSuchKeyFound.to_string(),
            "no key found in the scan range"
        );
        assert_eq!(
            TernError::ScanNotInitialized.to_string(),
            "scan not initialized"
        );
        assert_eq!(
            TernError::IndexScanCompleted.to_string(),
            "index scan completed"
        );
    }

    #[test]
    fn test_record_not_found_display() {
        let err = TernError::RecordNotFound {
            page_num: 3,
            slot: 7,
        };
        assert_eq!(err.to_string(), "record not found: 3:7");
    }

    #[test]
    fn test_unsupported_attr_type_display() {
        let err = TernError::UnsupportedAttrType(AttrType::VarChar);
        assert_eq!(
            err.to_string(),
            "unsupported attribute type for index: VARCHAR"
        );
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(TernError::BufferPoolFull)
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TernError>();
    }
}
