//! Login session: token acquisition, validation, silent refresh and
//! persistence.
//!
//! Tokens live in a private [`KeyValueStore`](yomu_storage::KeyValueStore);
//! the username and OAuth client pair live in the ordinary preferences
//! store. The access token has no local expiry clock: its liveness is
//! whatever `GET /auth/check` says.

pub mod error;
mod session;
mod state;

pub use crate::session::Session;
pub use crate::state::AuthState;

/// Storage keys. Tokens go to the secrets store, everything else to
/// preferences.
pub mod keys {
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const REFRESH_TOKEN: &str = "refresh_token";
    pub const CLIENT_ID: &str = "client_id";
    pub const CLIENT_SECRET: &str = "client_secret";
    pub const USERNAME: &str = "username";
}
