use thiserror::Error;

#[derive(Debug, Error)]
pub enum GtfsError {
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
    #[error("Network error: {0}")]
    NetworkMessage(String),
    #[error("GTFS parse error: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("ZIP error: {0}")]
    ZipError(#[from] zip::result::ZipError),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Cache error: {0}")]
    CacheError(String),
    #[error("Task join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = GtfsError::NetworkMessage("connection refused".into());
        assert_eq!(err.to_string(), "Network error: connection refused");

        let err = GtfsError::ParseError("routes.txt truncated".into());
        assert_eq!(err.to_string(), "GTFS parse error: routes.txt truncated");

        let err = GtfsError::CacheError("incomplete snapshot".into());
        assert_eq!(err.to_string(), "Cache error: incomplete snapshot");
    }

    #[test]
    fn error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: GtfsError = io_err.into();
        assert!(matches!(err, GtfsError::IoError(_)));
        assert!(err.to_string().contains("file not found"));
    }
}
