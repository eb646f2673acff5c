/// Published authentication status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    pub authenticated: bool,
    pub username: Option<String>,
}
impl AuthState {
    pub fn signed_in(username: impl Into<String>) -> Self {
        Self { authenticated: true, username: Some(username.into()) }
    }
}
