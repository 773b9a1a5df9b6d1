//! Core protocol pieces shared by the classifier and the session client.

pub mod analysis;
pub mod cipher;
pub mod executor;
pub mod reqwest_client;
pub mod types;

pub use analysis::{
    FormParseError, extract_login_form, goto_from_scan, meta_refresh_target, origin_from_url,
    parse_refresh_target, refresh_header_target,
};
pub use cipher::{CipherError, PaddingPolicy, derive_key, encrypt_password, pad_plaintext};
pub use executor::{PortalHttpClient, PortalHttpClientError, PortalHttpResponse, SessionFactory};
pub use reqwest_client::{ReqwestPortalSession, ReqwestSessionFactory};
pub use types::{
    Credentials, CredentialsError, FormSubmission, HiddenFields, LoginForm, RollcallOutcome,
    RollcallResult,
};
