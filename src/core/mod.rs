pub mod hardware;
pub mod models;
pub mod monitor;
pub mod orchestrator;
pub mod retry;
pub mod scanner;
pub mod session;
pub mod share;
pub mod transfer_engine;
pub mod verifier;

pub use hardware::VolumeSource;
pub use models::{CandidateFile, FileOutcome, SessionSummary, TransferStatus, Volume};
pub use monitor::{DeviceMonitor, ProcessedVolumes};
pub use orchestrator::Orchestrator;
pub use retry::RetryPolicy;
pub use scanner::ContentScanner;
pub use session::{SessionError, TransferSession};
pub use share::{RemoteShare, ShareConnector, ShareError};
pub use transfer_engine::{ChunkedTransferEngine, TransferError};
pub use verifier::{VerifyResult, verify_remote};
