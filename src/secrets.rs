//! Secret lookup, chosen once at startup.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("secret {0:?} is not set")]
    Missing(String),
    #[error("failed to read secret {name:?}: {source}")]
    Read {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

pub trait SecretSource: Send + Sync {
    fn get(&self, name: &str) -> Result<String, SecretError>;
}

/// Secrets held in environment variables of the same name.
#[derive(Debug, Default)]
pub struct EnvSecrets;

impl SecretSource for EnvSecrets {
    fn get(&self, name: &str) -> Result<String, SecretError> {
        match std::env::var(name) {
            Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
            _ => Err(SecretError::Missing(name.to_string())),
        }
    }
}

/// One file per secret inside `dir`, as mounted by container orchestrators.
#[derive(Debug)]
pub struct FileSecrets {
    dir: PathBuf,
}

impl FileSecrets {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl SecretSource for FileSecrets {
    fn get(&self, name: &str) -> Result<String, SecretError> {
        let path = self.dir.join(name);
        let value = std::fs::read_to_string(&path).map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => SecretError::Missing(name.to_string()),
            _ => SecretError::Read {
                name: name.to_string(),
                source,
            },
        })?;

        let value = value.trim();
        if value.is_empty() {
            return Err(SecretError::Missing(name.to_string()));
        }
        Ok(value.to_string())
    }
}
