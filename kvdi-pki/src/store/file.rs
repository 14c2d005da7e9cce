use super::{ObjectKey, Secret, SecretMeta, SecretStore};
use crate::codec::{BundleMap, TLS_KEY_KEY};
use crate::error::{PkiError, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

const METADATA_FILE: &str = "metadata.json";

/// Directory-backed secret store.
///
/// # Layout
///
/// ```text
/// root/
/// └── <namespace>/
///     └── <name>/
///         ├── ca.crt
///         ├── tls.crt
///         ├── tls.key        # mode 0600 on unix
///         └── metadata.json  # labels, annotations, owner references
/// ```
///
/// Writes are staged in a hidden sibling directory and renamed into place,
/// so a secret directory is either absent or complete.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn secret_dir(&self, key: &ObjectKey) -> Result<PathBuf> {
        for part in [&key.namespace, &key.name] {
            if part.is_empty() || part == "." || part == ".." || part.contains(['/', '\\']) {
                return Err(PkiError::Store(format!("invalid secret key {key}")));
            }
        }
        Ok(self.root.join(&key.namespace).join(&key.name))
    }

    async fn write_data(dir: &Path, data: &BundleMap) -> Result<()> {
        for (name, contents) in data {
            if name == METADATA_FILE || name.contains(['/', '\\']) {
                return Err(PkiError::Store(format!("invalid data key {name}")));
            }
            let path = dir.join(name);
            fs::write(&path, contents).await?;
            if name == TLS_KEY_KEY {
                restrict_permissions(&path).await?;
            }
        }
        Ok(())
    }

    async fn write_meta(dir: &Path, meta: &SecretMeta) -> Result<()> {
        let json = serde_json::to_vec_pretty(meta)?;
        fs::write(dir.join(METADATA_FILE), json).await?;
        Ok(())
    }

    async fn read_meta(dir: &Path) -> Result<SecretMeta> {
        match fs::read(dir.join(METADATA_FILE)).await {
            Ok(contents) => Ok(serde_json::from_slice(&contents)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(SecretMeta::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write a complete secret next to `dir` and return the staging path.
    async fn stage(dir: &Path, meta: &SecretMeta, data: &BundleMap) -> Result<PathBuf> {
        let staging = sibling(dir, "tmp");
        fs::create_dir(&staging).await?;
        let written = match Self::write_meta(&staging, meta).await {
            Ok(()) => Self::write_data(&staging, data).await,
            Err(e) => Err(e),
        };
        match written {
            Ok(()) => Ok(staging),
            Err(e) => {
                discard(&staging).await;
                Err(e)
            }
        }
    }

    async fn read_secret(key: &ObjectKey, dir: &Path) -> Result<Secret> {
        let mut meta = SecretMeta::default();
        let mut data = BundleMap::new();

        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let contents = fs::read(entry.path()).await?;
            if name == METADATA_FILE {
                meta = serde_json::from_slice(&contents)?;
            } else {
                data.insert(name, contents);
            }
        }

        Ok(Secret {
            key: key.clone(),
            meta,
            data,
        })
    }

    /// Delete every secret owned by the resource with this UID.
    ///
    /// Returns the number of secrets removed.
    pub async fn delete_owned_by(&self, uid: &str) -> Result<usize> {
        let mut removed = 0;
        let mut namespaces = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        while let Some(namespace) = namespaces.next_entry().await? {
            if !namespace.file_type().await?.is_dir() {
                continue;
            }
            let mut secrets = fs::read_dir(namespace.path()).await?;
            while let Some(secret) = secrets.next_entry().await? {
                if secret.file_name().to_string_lossy().starts_with('.') {
                    continue;
                }
                let meta_path = secret.path().join(METADATA_FILE);
                let contents = match fs::read(&meta_path).await {
                    Ok(contents) => contents,
                    Err(e) if e.kind() == ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                };
                let meta: SecretMeta = serde_json::from_slice(&contents)?;
                if meta.is_owned_by(uid) {
                    fs::remove_dir_all(secret.path()).await?;
                    tracing::debug!(path = %secret.path().display(), "Removed owned secret");
                    removed += 1;
                }
            }
        }

        Ok(removed)
    }
}

/// A hidden path beside `dir` for staging or retiring a secret.
fn sibling(dir: &Path, tag: &str) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.with_file_name(format!(".{name}.{tag}-{:016x}", rand::random::<u64>()))
}

/// Best-effort removal of a staging or retired directory.
async fn discard(path: &Path) {
    if let Err(e) = fs::remove_dir_all(path).await {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove leftover secret directory");
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[async_trait]
impl SecretStore for FileStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<Secret>> {
        let dir = self.secret_dir(key)?;
        match fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(PkiError::Store(format!("{} is not a directory", dir.display()))),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        Self::read_secret(key, &dir).await.map(Some)
    }

    async fn create(&self, secret: Secret) -> Result<()> {
        let dir = self.secret_dir(&secret.key)?;
        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent).await?;
        }
        if fs::try_exists(&dir).await? {
            return Err(PkiError::AlreadyExists(secret.key.to_string()));
        }

        let staging = Self::stage(&dir, &secret.meta, &secret.data).await?;
        match fs::rename(&staging, &dir).await {
            Ok(()) => Ok(()),
            Err(e) => {
                discard(&staging).await;
                match e.kind() {
                    ErrorKind::AlreadyExists | ErrorKind::DirectoryNotEmpty => {
                        Err(PkiError::AlreadyExists(secret.key.to_string()))
                    }
                    _ => Err(e.into()),
                }
            }
        }
    }

    async fn update(&self, key: &ObjectKey, data: BundleMap) -> Result<()> {
        if data.is_empty() {
            return self.delete(key).await;
        }

        let dir = self.secret_dir(key)?;
        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent).await?;
        }
        let exists = fs::try_exists(&dir).await?;
        let meta = if exists {
            Self::read_meta(&dir).await?
        } else {
            SecretMeta::default()
        };

        // Data files are replaced wholesale, the metadata carries over
        let staging = Self::stage(&dir, &meta, &data).await?;
        if !exists {
            if let Err(e) = fs::rename(&staging, &dir).await {
                discard(&staging).await;
                return Err(e.into());
            }
            return Ok(());
        }

        let old = sibling(&dir, "old");
        if let Err(e) = fs::rename(&dir, &old).await {
            discard(&staging).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&staging, &dir).await {
            if let Err(restore) = fs::rename(&old, &dir).await {
                tracing::error!(path = %dir.display(), error = %restore, "Failed to restore secret");
            }
            discard(&staging).await;
            return Err(e.into());
        }
        discard(&old).await;
        Ok(())
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let dir = self.secret_dir(key)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
