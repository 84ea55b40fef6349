pub mod scanner;

pub use scanner::{scan, AnnouncementIndexer, ScanOptions, ScanOutcome};

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// The discovery socket could not be opened, configured or written to
    #[error("SSDP socket error: {0}")]
    Socket(#[from] std::io::Error),

    #[error("malformed announcement: {0}")]
    MalformedAnnouncement(String),
}
