//! Access-token providers.
//!
//! The send gate queries the provider for every frame, so a token that is
//! replaced after login (or cleared on logout) takes effect on the very
//! next capture tick.

use std::sync::{Arc, RwLock};

/// Supplies the bearer credential attached to outbound frames.
pub trait CredentialProvider: Send + Sync {
    /// Current access token, or `None` when the user is not signed in.
    fn access_token(&self) -> Option<String>;
}

/// A token fixed at construction time.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    /// Wrap a token. Empty strings count as absent.
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        Self((!token.is_empty()).then_some(token))
    }

    /// A provider that never yields a token.
    pub fn none() -> Self {
        Self(None)
    }
}

impl CredentialProvider for StaticToken {
    fn access_token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// An in-memory token that can be replaced while the session runs.
///
/// Cloning yields another handle to the same slot.
#[derive(Debug, Clone, Default)]
pub struct SharedToken {
    slot: Arc<RwLock<Option<String>>>,
}

impl SharedToken {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored token. `None` or an empty string clears it.
    pub fn set(&self, token: Option<String>) {
        let token = token.filter(|t| !t.is_empty());
        match self.slot.write() {
            Ok(mut guard) => *guard = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }

    /// Clear the stored token.
    pub fn clear(&self) {
        self.set(None);
    }
}

impl CredentialProvider for SharedToken {
    fn access_token(&self) -> Option<String> {
        match self.slot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl<T: CredentialProvider + ?Sized> CredentialProvider for Arc<T> {
    fn access_token(&self) -> Option<String> {
        (**self).access_token()
    }
}
