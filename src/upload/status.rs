// src/upload/status.rs
//! Outcome of one upload attempt

use std::fmt;

/// Classified result of `DataUploader::upload`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadStatus {
    Success,
    Redirection,
    /// 401/403: credentials rejected, retrying will not help
    InvalidTokenError,
    /// 408/429: the collector asked us to slow down
    ClientErrorRateLimited,
    ClientError,
    ServerError,
    NetworkError,
    DnsError,
    UnknownError,
}

impl UploadStatus {
    /// Classify an HTTP status code
    pub fn from_http_code(code: u16) -> Self {
        match code {
            200..=299 => UploadStatus::Success,
            300..=399 => UploadStatus::Redirection,
            401 | 403 => UploadStatus::InvalidTokenError,
            408 | 429 => UploadStatus::ClientErrorRateLimited,
            400..=499 => UploadStatus::ClientError,
            500..=599 => UploadStatus::ServerError,
            _ => UploadStatus::UnknownError,
        }
    }

    /// Whether the batch should stay on disk for another attempt
    pub fn should_retry(&self) -> bool {
        matches!(
            self,
            UploadStatus::ClientErrorRateLimited
                | UploadStatus::ServerError
                | UploadStatus::NetworkError
                | UploadStatus::DnsError
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Success => "success",
            UploadStatus::Redirection => "redirection",
            UploadStatus::InvalidTokenError => "invalid_token",
            UploadStatus::ClientErrorRateLimited => "rate_limited",
            UploadStatus::ClientError => "client_error",
            UploadStatus::ServerError => "server_error",
            UploadStatus::NetworkError => "network_error",
            UploadStatus::DnsError => "dns_error",
            UploadStatus::UnknownError => "unknown_error",
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
