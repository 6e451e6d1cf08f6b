//! Password-derived encrypted file backend.
//!
//! One file per secret key under a fixed per-user directory. The store key
//! is derived from the password with scrypt against a per-store random salt;
//! each record is the token JSON sealed with AES-256-GCM under a fresh
//! nonce. File permissions restrict access to the owning user.

use std::fs;
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::{
    normalize_email, token_key, SecretStore, StoreError, Token, DEFAULT_ACCOUNT_KEY,
    TOKEN_KEY_PREFIX,
};

const SALT_FILE: &str = ".salt";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// Staging-file suffix. `!` is always percent-encoded in record filenames,
/// so a staging name can never equal any record's final path, whatever the
/// key. `keys` skips names carrying this suffix.
const TMP_SUFFIX: &str = "!tmp";

/// On-disk shape of one sealed record.
#[derive(Serialize, Deserialize)]
struct SealedRecord {
    nonce: String,
    ciphertext: String,
}

pub struct FileStore {
    dir: PathBuf,
    key: [u8; 32],
}

impl FileStore {
    /// Open (or initialize) the store at `dir` with the given password.
    pub fn open(dir: impl Into<PathBuf>, password: &str) -> Result<Self, StoreError> {
        Self::open_with_params(
            dir,
            password,
            scrypt::Params::recommended(),
        )
    }

    /// Open with explicit scrypt parameters. Tests use cheap parameters;
    /// production callers go through [`FileStore::open`].
    pub fn open_with_params(
        dir: impl Into<PathBuf>,
        password: &str,
        params: scrypt::Params,
    ) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        restrict_permissions(&dir, 0o700)?;

        let salt = load_or_create_salt(&dir)?;
        let mut key = [0u8; 32];
        scrypt::scrypt(password.as_bytes(), &salt, &params, &mut key)
            .map_err(|e| StoreError::Crypto(format!("key derivation failed: {e}")))?;

        Ok(Self { dir, key })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(urlencoding::encode(key).into_owned())
    }

    fn tmp_path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}{TMP_SUFFIX}", urlencoding::encode(key)))
    }

    fn seal(&self, plaintext: &[u8]) -> Result<SealedRecord, StoreError> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| StoreError::Crypto(format!("failed to create cipher: {e}")))?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| StoreError::Crypto(format!("encryption failed: {e}")))?;
        Ok(SealedRecord {
            nonce: BASE64.encode(nonce),
            ciphertext: BASE64.encode(ciphertext),
        })
    }

    fn unseal(&self, record: &SealedRecord) -> Result<Vec<u8>, StoreError> {
        let nonce = BASE64
            .decode(&record.nonce)
            .map_err(|e| StoreError::Crypto(format!("failed to decode nonce: {e}")))?;
        if nonce.len() != NONCE_LEN {
            return Err(StoreError::Crypto(format!(
                "invalid nonce size: expected {NONCE_LEN}, got {}",
                nonce.len()
            )));
        }
        let ciphertext = BASE64
            .decode(&record.ciphertext)
            .map_err(|e| StoreError::Crypto(format!("failed to decode ciphertext: {e}")))?;
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| StoreError::Crypto(format!("failed to create cipher: {e}")))?;
        cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|_| {
                StoreError::Crypto("decryption failed (wrong password or corrupted data)".to_string())
            })
    }

    fn read_record(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(key);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let sealed: SealedRecord = serde_json::from_slice(&data)?;
        self.unseal(&sealed)
    }

    /// Write a record atomically: seal to a temp file, then rename over the
    /// final path so readers never observe a partial record.
    fn write_record(&self, key: &str, plaintext: &[u8]) -> Result<(), StoreError> {
        let sealed = self.seal(plaintext)?;
        let path = self.path_for(key);
        let tmp = self.tmp_path_for(key);
        fs::write(&tmp, serde_json::to_vec(&sealed)?)?;
        restrict_permissions(&tmp, 0o600)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

impl SecretStore for FileStore {
    fn get_token(&self, email: &str) -> Result<Token, StoreError> {
        let key = token_key(email);
        let plaintext = self.read_record(&key)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    fn set_token(&self, email: &str, token: Token) -> Result<(), StoreError> {
        let key = token_key(email);
        self.write_record(&key, &serde_json::to_vec(&token)?)
    }

    fn delete_token(&self, email: &str) -> Result<(), StoreError> {
        let key = token_key(email);
        let path = self.path_for(&key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            // Staging leftovers from an interrupted write are not records.
            if name.ends_with(TMP_SUFFIX) {
                continue;
            }
            let Ok(decoded) = urlencoding::decode(&name) else {
                continue;
            };
            if decoded.starts_with(TOKEN_KEY_PREFIX) {
                out.push(decoded.into_owned());
            }
        }
        out.sort();
        Ok(out)
    }

    fn list_tokens(&self) -> Result<Vec<Token>, StoreError> {
        let mut out = Vec::new();
        for key in self.keys()? {
            let plaintext = self.read_record(&key)?;
            out.push(serde_json::from_slice(&plaintext)?);
        }
        Ok(out)
    }

    fn default_account(&self) -> Result<Option<String>, StoreError> {
        match self.read_record(DEFAULT_ACCOUNT_KEY) {
            Ok(plaintext) => Ok(Some(
                String::from_utf8(plaintext)
                    .map_err(|_| StoreError::Crypto("default account is not UTF-8".to_string()))?,
            )),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn set_default_account(&self, email: &str) -> Result<(), StoreError> {
        // The default must reference a stored account.
        self.get_token(email)?;
        self.write_record(DEFAULT_ACCOUNT_KEY, normalize_email(email).as_bytes())
    }
}

fn load_or_create_salt(dir: &Path) -> Result<Vec<u8>, StoreError> {
    let path = dir.join(SALT_FILE);
    match fs::read(&path) {
        Ok(salt) if salt.len() == SALT_LEN => Ok(salt),
        Ok(_) => Err(StoreError::Crypto("corrupt salt file".to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let mut salt = vec![0u8; SALT_LEN];
            rand::rngs::OsRng.fill_bytes(&mut salt);
            fs::write(&path, &salt)?;
            restrict_permissions(&path, 0o600)?;
            Ok(salt)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> Result<(), StoreError> {
    Ok(())
}

/// Cheap scrypt parameters so tests don't spend seconds on key derivation.
pub fn test_params() -> scrypt::Params {
    scrypt::Params::new(8, 8, 1, 32).expect("valid scrypt params")
}
