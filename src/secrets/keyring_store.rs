//! Native OS credential-manager backend.
//!
//! macOS keychain, Windows Credential Manager, or the Secret Service on
//! Linux, via the `keyring` crate. The platform stores cannot enumerate
//! entries, so a dedicated index entry tracks the known keys.

use std::time::Duration;

use keyring::Entry;
use tracing::warn;

use super::{
    normalize_email, token_key, SecretStore, StoreError, Token, DEFAULT_ACCOUNT_KEY,
    KEYRING_SERVICE, TOKEN_KEY_PREFIX,
};

const INDEX_KEY: &str = "__index__";
const PREFLIGHT_KEY: &str = "__preflight__";

pub struct NativeStore {
    service: String,
}

impl NativeStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, StoreError> {
        Entry::new(&self.service, key).map_err(|e| StoreError::Keyring(e.to_string()))
    }

    fn read(&self, key: &str) -> Result<String, StoreError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(value),
            Err(keyring::Error::NoEntry) => Err(StoreError::NotFound(key.to_string())),
            Err(e) => Err(StoreError::Keyring(e.to_string())),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entry(key)?
            .set_password(value)
            .map_err(|e| StoreError::Keyring(e.to_string()))
    }

    fn index(&self) -> Result<Vec<String>, StoreError> {
        match self.read(INDEX_KEY) {
            Ok(raw) => parse_index(&raw),
            Err(StoreError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn write_index(&self, keys: &[String]) -> Result<(), StoreError> {
        self.write(INDEX_KEY, &serde_json::to_string(keys)?)
    }

    fn index_insert(&self, key: &str) -> Result<(), StoreError> {
        let mut keys = self.index()?;
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
            keys.sort();
            self.write_index(&keys)?;
        }
        Ok(())
    }

    fn index_remove(&self, key: &str) -> Result<(), StoreError> {
        let mut keys = self.index()?;
        let before = keys.len();
        keys.retain(|k| k != key);
        if keys.len() != before {
            self.write_index(&keys)?;
        }
        Ok(())
    }
}

impl SecretStore for NativeStore {
    fn get_token(&self, email: &str) -> Result<Token, StoreError> {
        let key = token_key(email);
        let raw = self.read(&key)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn set_token(&self, email: &str, token: Token) -> Result<(), StoreError> {
        let key = token_key(email);
        self.write(&key, &serde_json::to_string(&token)?)?;
        self.index_insert(&key)
    }

    fn delete_token(&self, email: &str) -> Result<(), StoreError> {
        let key = token_key(email);
        match self.entry(&key)?.delete_credential() {
            Ok(()) => self.index_remove(&key),
            Err(keyring::Error::NoEntry) => Err(StoreError::NotFound(key)),
            Err(e) => Err(StoreError::Keyring(e.to_string())),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .index()?
            .into_iter()
            .filter(|k| k.starts_with(TOKEN_KEY_PREFIX))
            .collect())
    }

    fn list_tokens(&self) -> Result<Vec<Token>, StoreError> {
        let mut out = Vec::new();
        for key in self.keys()? {
            match self.read(&key) {
                Ok(raw) => out.push(serde_json::from_str(&raw)?),
                // Entry removed behind our back; drop it from the index.
                Err(StoreError::NotFound(_)) => {
                    warn!(key = %key, "stale index entry");
                    let _ = self.index_remove(&key);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    fn default_account(&self) -> Result<Option<String>, StoreError> {
        match self.read(DEFAULT_ACCOUNT_KEY) {
            Ok(email) => Ok(Some(email)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn set_default_account(&self, email: &str) -> Result<(), StoreError> {
        self.get_token(email)?;
        self.write(DEFAULT_ACCOUNT_KEY, &normalize_email(email))
    }
}

/// Parse the stored key index. A corrupt index is an error, not an empty
/// store; treating it as empty would hide every stored account.
fn parse_index(raw: &str) -> Result<Vec<String>, StoreError> {
    serde_json::from_str(raw)
        .map_err(|e| StoreError::Invalid(format!("corrupt keyring index: {e}")))
}

/// Bounded pre-flight probe of the native credential manager.
///
/// The first access per process may pop an unlock prompt; non-interactive
/// callers use this to fail fast instead of blocking indefinitely. The probe
/// runs on a worker thread so the wait can be capped.
pub fn ensure_native_access(timeout: Duration) -> Result<(), StoreError> {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let probe = || -> Result<(), keyring::Error> {
            let entry = Entry::new(KEYRING_SERVICE, PREFLIGHT_KEY)?;
            entry.set_password("ok")?;
            let _ = entry.get_password()?;
            let _ = entry.delete_credential();
            Ok(())
        };
        let _ = tx.send(probe());
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(StoreError::BackendUnavailable(e.to_string())),
        Err(_) => Err(StoreError::BackendUnavailable(format!(
            "keyring probe timed out after {timeout:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_index_valid_list() {
        let keys = parse_index(r#"["token:a@b.com","token:c@d.com"]"#).unwrap();
        assert_eq!(keys, vec!["token:a@b.com", "token:c@d.com"]);
    }

    #[test]
    fn test_parse_index_rejects_corrupt_entry() {
        assert!(matches!(
            parse_index("not json"),
            Err(StoreError::Invalid(_))
        ));
        assert!(matches!(
            parse_index(r#"{"oops": true}"#),
            Err(StoreError::Invalid(_))
        ));
    }
}
