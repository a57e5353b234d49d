//! Credential handling for the portal login and the report webhook.
//!
//! Secrets live in one [`Credentials`] value per check cycle, loaded from a
//! swappable backing store and wiped when dropped. The `Debug` impl redacts
//! the password and API key so they cannot leak through logging.

use std::env;
use std::fmt;
use tracing::{debug, warn};

const USERNAME_VAR: &str = "AutoMarkCheckVuwUsername";
const PASSWORD_VAR: &str = "AutoMarkCheckVuwPassword";
const API_KEY_VAR: &str = "AutoMarkCheckApiKey";

/// A student's portal login plus the webhook API key.
pub struct Credentials {
    username: String,
    password: String,
    api_key: String,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            api_key: api_key.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl Drop for Credentials {
    fn drop(&mut self) {
        scrub_string(&mut self.password);
        scrub_string(&mut self.api_key);
    }
}

/// Overwrites a string's bytes with zeros before releasing it.
///
/// Volatile writes so the wipe survives optimization. This only shortens the
/// window a secret sits in freed memory; transient copies made by the HTTP
/// stack are out of reach.
pub fn scrub_string(s: &mut String) {
    let mut bytes = std::mem::take(s).into_bytes();
    for byte in bytes.iter_mut() {
        // SAFETY: `byte` is a valid, aligned pointer into the owned Vec.
        unsafe { std::ptr::write_volatile(byte, 0) };
    }
}

/// Backing store for credentials.
///
/// The store is a collaborator, not part of the agent: an OS keychain, the
/// environment, or a config file all fit behind this seam.
pub trait CredentialStore {
    /// Returns the stored credentials, or `None` when any part is missing.
    fn get_credentials(&self) -> Option<Credentials>;

    /// Saves credentials, replacing any existing ones.
    fn set_credentials(&self, credentials: &Credentials);

    /// Removes stored credentials.
    fn delete_credentials(&self);
}

/// Environment-variable backed store, using the same variable names as the
/// original agent.
///
/// `set`/`delete` act on the process environment; persisting them across
/// runs is the deployment's job (shell profile, systemd unit, or similar).
pub struct EnvCredentialStore;

impl CredentialStore for EnvCredentialStore {
    fn get_credentials(&self) -> Option<Credentials> {
        let username = env::var(USERNAME_VAR).ok().filter(|v| !v.is_empty());
        let password = env::var(PASSWORD_VAR).ok().filter(|v| !v.is_empty());
        let api_key = env::var(API_KEY_VAR).ok().filter(|v| !v.is_empty());

        if username.is_none() {
            warn!("university username not set, expected in {USERNAME_VAR}");
        }
        if password.is_none() {
            warn!("university password not set, expected in {PASSWORD_VAR}");
        }
        if api_key.is_none() {
            warn!("report API key not set, expected in {API_KEY_VAR}");
        }

        let credentials = Credentials {
            username: username?,
            password: password?,
            api_key: api_key?,
        };
        debug!("loaded credentials from the environment");
        Some(credentials)
    }

    fn set_credentials(&self, credentials: &Credentials) {
        env::set_var(USERNAME_VAR, &credentials.username);
        env::set_var(PASSWORD_VAR, &credentials.password);
        env::set_var(API_KEY_VAR, &credentials.api_key);
    }

    fn delete_credentials(&self) {
        env::remove_var(USERNAME_VAR);
        env::remove_var(PASSWORD_VAR);
        env::remove_var(API_KEY_VAR);
    }
}
