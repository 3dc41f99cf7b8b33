//! Authentication for the Life Changing Journey API
//!
//! Holds the credential pair, refreshes it on demand and owns the
//! login/logout flows.

pub mod refresh;
pub mod session;
pub mod tokens;

pub use session::{login, logout, status};

/// Side effect fired once when a session can no longer be recovered.
pub trait LoginRedirect: Send + Sync {
    fn redirect_to_login(&self);
}

/// Terminal version of "navigate to the login page"
pub struct CliRedirect;

impl LoginRedirect for CliRedirect {
    fn redirect_to_login(&self) {
        eprintln!("Session expired. Run 'lcj login' to sign in again.");
    }
}
