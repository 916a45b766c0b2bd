//! Credentials presented to a server when a connection is opened.

use std::collections::BTreeMap;

use cassa_rpc::types::AuthenticationRequest;
use cassa_rpc::ServerAddr;

/// Type to represent an authentication error message.
pub type AuthError = String;

/// Trait used to represent a factory of [`AuthenticationRequest`]s.
/// It is asked for credentials every time a new connection is opened, so an
/// implementation may rotate them or pick them per server.
///
/// The custom authenticator can be set using SessionBuilder::authenticator_provider method.
///
/// Default: [`PlainTextAuthenticator`] is the default authenticator which requires username and
/// password. It can be set by using SessionBuilder::user(\"user\", \"pass\") method.
pub trait AuthenticatorProvider: Send + Sync {
    /// Produces the credentials to present to `server`.
    fn authentication_request(&self, server: &ServerAddr)
        -> Result<AuthenticationRequest, AuthError>;
}

/// Default authenticator provider: presents a username and a password.
pub struct PlainTextAuthenticator {
    username: String,
    password: String,
}

impl PlainTextAuthenticator {
    /// Creates new [`PlainTextAuthenticator`] instance with provided username and password.
    pub fn new(username: String, password: String) -> Self {
        PlainTextAuthenticator { username, password }
    }
}

impl AuthenticatorProvider for PlainTextAuthenticator {
    fn authentication_request(
        &self,
        _server: &ServerAddr,
    ) -> Result<AuthenticationRequest, AuthError> {
        let mut credentials = BTreeMap::new();
        credentials.insert("username".to_owned(), self.username.clone());
        credentials.insert("password".to_owned(), self.password.clone());
        Ok(AuthenticationRequest { credentials })
    }
}

// Passwords stay out of logs.
impl std::fmt::Debug for PlainTextAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlainTextAuthenticator")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}
