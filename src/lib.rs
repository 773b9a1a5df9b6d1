//! # rollcall-rs
//!
//! Direct-HTTP client for the NKUST e-learning rollcall (attendance) form.
//!
//! The portal guards its login form with a client-side DES routine keyed by
//! a per-page `login_key`. This crate replays that routine, submits the form
//! over a private cookie session, follows the portal's `Refresh` redirects
//! and classifies the resulting page.
//!
//! ## Features
//!
//! - Byte-exact replica of the portal's `encrypt_pwd` cipher (zero or PKCS#7 padding)
//! - Tolerant HTML form extraction
//! - One isolated cookie session per attempt
//! - Per-request timeouts and cooperative cancellation
//! - Structured events, `log` output and metrics
//!
//! ## Example
//!
//! ```no_run
//! use rollcall_rs::{Credentials, RollcallClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RollcallClient::new()?;
//!     let credentials = Credentials::new("c110152001", "secret")?;
//!     let result = client.attempt_rollcall(Some("MeFqUN8kZvb5..."), &credentials).await?;
//!     println!("{}: {}", result.outcome, result.message);
//!     Ok(())
//! }
//! ```

mod rollcall;

pub mod config;
pub mod modules;
pub mod portal;

pub use crate::rollcall::{
    ROLLCALL_PATH,
    RollcallClient,
    RollcallClientBuilder,
    RollcallClientResult,
    RollcallError,
};

pub use crate::config::{ConfigError, RollcallConfig};

pub use crate::portal::core::{
    CipherError,
    Credentials,
    CredentialsError,
    FormParseError,
    FormSubmission,
    HiddenFields,
    LoginForm,
    PaddingPolicy,
    PortalHttpClient,
    PortalHttpClientError,
    PortalHttpResponse,
    ReqwestPortalSession,
    ReqwestSessionFactory,
    RollcallOutcome,
    RollcallResult,
    SessionFactory,
    encrypt_password,
    extract_login_form,
    goto_from_scan,
};

pub use crate::portal::detectors::{Detection, MarkerSet, ResultClassifier};

pub use crate::modules::{
    AttemptEvent,
    AttemptStage,
    EventDispatcher,
    EventHandler,
    LoggingHandler,
    MetricsCollector,
    MetricsHandler,
    MetricsSnapshot,
};

/// Re-exported so callers can cancel attempts without a direct dependency.
pub use tokio_util::sync::CancellationToken;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
