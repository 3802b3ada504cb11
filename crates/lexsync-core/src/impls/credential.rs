//! InMemoryCredentialStore - プロセス内の bearer credential

use std::sync::{RwLock, PoisonError};

use tracing::info;

use crate::ports::CredentialStore;

#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    token: RwLock<Option<String>>,
}

impl InMemoryCredentialStore {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token),
        }
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn token(&self) -> Option<String> {
        self.token.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn store(&self, token: String) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    fn discard(&self) {
        let previous = self.token.write().unwrap_or_else(PoisonError::into_inner).take();
        if previous.is_some() {
            info!("stored credential discarded");
        }
    }
}
