//! Concurrent chunked upload pipeline for LANVan.
//!
//! - [`UploadCoordinator`] admits files, bounds concurrent disk writers and
//!   drives one task per session
//! - [`UploadSession`] is the per-file state machine
//! - [`AtomicFinalizer`] verifies and publishes finished files
//! - [`UploadReport`] is the per-file outcome

pub mod admission;
pub mod coordinator;
pub mod error;
pub mod finalizer;
pub mod metrics;
pub mod report;
pub mod session;

pub use admission::{AdmissionCheck, BlockedExtensions};
pub use coordinator::{Environment, SessionHandle, UploadCoordinator};
pub use error::{UploadError, UploadResult};
pub use finalizer::AtomicFinalizer;
pub use report::{SessionSnapshot, UploadReport};
pub use session::{EncryptionSetup, UploadSession};
