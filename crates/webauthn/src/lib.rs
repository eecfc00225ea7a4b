//! Passwordless WebAuthn/FIDO2 registration and login.
//!
//! Grounded on `neonsignal/webauthn.c++` in full: challenge issuance,
//! the minimal CBOR walk over `attestationObject`/COSE keys, ECDSA-P256
//! assertion verification and the session TTL/extension rules. The
//! legacy undecorated `make_register_options`/`finish_register` pair
//! (pre-existing-secret registration, already disabled upstream) has no
//! counterpart here — only the `_for_user` ceremony, gated on an
//! already-verified account, is implemented.

mod base64url;
mod cbor;
mod cose;
mod error;
mod manager;
mod models;

pub use error::{Error, Result};
pub use manager::{session_ttl_secs, WebAuthnManager};
pub use models::{LoginOptions, LoginResult, RegisterOptions, WebAuthnCredential};
