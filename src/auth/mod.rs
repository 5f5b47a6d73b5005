//! Azure AD authentication module.
//!
//! Provides OAuth2 with PKCE, the loopback redirect listener, the interactive
//! browser sign-in built on both, and the resulting [`Session`].

pub mod callback_server;
pub mod interactive;
pub mod oauth;
pub mod session;

pub use interactive::{BrowserLauncher, InteractiveLogin};
pub use session::{SecureString, Session};
