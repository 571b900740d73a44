//! Minimal configuration the handshake itself needs.
//!
//! DSN/URL parsing, environment-variable fallback, and pool sizing live
//! upstream of this crate; by the time a caller reaches `Connection::handshake`
//! it has already resolved all of that into a `StartupOptions`.

/// Parameters sent in the `StartupMessage`, plus the password used to answer
/// an authentication challenge.
#[derive(Debug, Clone)]
pub struct StartupOptions {
    pub user: String,
    pub database: String,
    pub password: Option<String>,
    pub application_name: Option<String>,
}

impl StartupOptions {
    pub fn new(user: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            database: database.into(),
            password: None,
            application_name: None,
        }
    }

    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }
}
