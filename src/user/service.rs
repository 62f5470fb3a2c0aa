use std::sync::Arc;

use validator::Validate;

use crate::crypto::PasswordManager;
use crate::database::UserStore;
use crate::error::{Result, ServerError};
use crate::storage::{AssetStorage, Upload};
use crate::user::{NewUser, Registration, User};

/// Registration and listing of users.
#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn UserStore>,
    storage: AssetStorage,
    pwd: Arc<PasswordManager>,
    cleanup_on_failure: bool,
}

impl UserService {
    /// Create a new [`UserService`].
    pub fn new(
        store: Arc<dyn UserStore>,
        storage: AssetStorage,
        pwd: Arc<PasswordManager>,
    ) -> Self {
        Self {
            store,
            storage,
            pwd,
            cleanup_on_failure: true,
        }
    }

    /// Keep or delete the stored image when registration fails afterwards.
    pub fn cleanup_on_failure(mut self, enabled: bool) -> Self {
        self.cleanup_on_failure = enabled;
        self
    }

    pub fn storage(&self) -> &AssetStorage {
        &self.storage
    }

    /// Store image, hash password then insert the user document.
    pub async fn register(
        &self,
        registration: Registration,
        upload: Option<Upload>,
    ) -> Result<User> {
        let image = match upload {
            Some(upload) => Some(self.storage.store(&upload).await?),
            None => None,
        };

        // Removes the image if this future is dropped before completion.
        let pending = image
            .clone()
            .filter(|_| self.cleanup_on_failure)
            .map(|name| PendingImage::new(self.storage.clone(), name));

        match self.create(registration, image).await {
            Ok(user) => {
                if let Some(pending) = pending {
                    pending.keep();
                }
                metrics::counter!("users_registered_total").increment(1);
                tracing::info!(user_id = %user.id, image = ?user.image, "user registered");
                Ok(user)
            },
            Err(err) => {
                if let Some(pending) = pending {
                    pending.discard().await;
                }
                Err(err)
            },
        }
    }

    async fn create(
        &self,
        registration: Registration,
        image: Option<String>,
    ) -> Result<User> {
        registration.validate()?;
        let password = registration.password.unwrap_or_default();

        let pwd = Arc::clone(&self.pwd);
        let password = tokio::task::spawn_blocking(move || pwd.hash_password(password))
            .await
            .map_err(|err| ServerError::Internal {
                details: "password hashing task failed".into(),
                source: Some(err.into()),
            })??;

        let user = NewUser {
            name: registration.name,
            email: registration.email,
            password,
            mobile: registration.mobile,
            image,
        };

        Ok(self.store.insert(user).await?)
    }

    /// Every registered user.
    pub async fn list(&self) -> Result<Vec<User>> {
        let users = self.store.list().await?;
        tracing::debug!(count = users.len(), ?users, "fetched users");
        Ok(users)
    }
}

/// Stored image not yet referenced by a user document.
struct PendingImage {
    storage: AssetStorage,
    name: Option<String>,
}

impl PendingImage {
    fn new(storage: AssetStorage, name: String) -> Self {
        Self {
            storage,
            name: Some(name),
        }
    }

    /// The document references the image.
    fn keep(mut self) {
        self.name = None;
    }

    async fn discard(mut self) {
        if let Some(name) = self.name.take() {
            remove_orphan(&self.storage, &name).await;
        }
    }
}

impl Drop for PendingImage {
    fn drop(&mut self) {
        let Some(name) = self.name.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let storage = self.storage.clone();
                handle.spawn(async move { remove_orphan(&storage, &name).await });
            },
            Err(_) => {
                tracing::warn!(file = %name, "registration cancelled outside a runtime, upload kept");
            },
        }
    }
}

async fn remove_orphan(storage: &AssetStorage, name: &str) {
    match storage.remove(name).await {
        Ok(()) => tracing::debug!(file = %name, "removed orphaned upload"),
        Err(err) => {
            tracing::warn!(file = %name, error = %err, "cannot remove orphaned upload")
        },
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::database::tests::BrokenStore;
    use crate::database::{DatabaseError, MemoryStore};

    /// Store whose writes never complete.
    struct StalledStore;

    #[async_trait]
    impl UserStore for StalledStore {
        async fn insert(&self, _: NewUser) -> std::result::Result<User, DatabaseError> {
            std::future::pending().await
        }

        async fn list(&self) -> std::result::Result<Vec<User>, DatabaseError> {
            Ok(Vec::new())
        }
    }

    fn service(store: Arc<dyn UserStore>, dir: &tempfile::TempDir) -> UserService {
        UserService::new(
            store,
            AssetStorage::new(dir.path()),
            Arc::new(crate::crypto::tests::manager()),
        )
    }

    fn registration(password: Option<&str>) -> Registration {
        Registration {
            name: Some("Ada".into()),
            email: Some("ada@x.com".into()),
            password: password.map(Into::into),
            mobile: Some("555".into()),
        }
    }

    fn upload() -> Upload {
        Upload {
            original_name: "avatar.png".into(),
            bytes: vec![1, 2, 3, 4],
        }
    }

    fn files(dir: &tempfile::TempDir) -> usize {
        std::fs::read_dir(dir.path()).unwrap().count()
    }

    #[tokio::test]
    async fn test_register_without_image() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(Arc::new(MemoryStore::default()), &dir);

        let user = service.register(registration(Some("secret")), None).await.unwrap();

        assert_eq!(user.name.as_deref(), Some("Ada"));
        assert_eq!(user.image, None);
        assert_ne!(user.password, "secret");
        assert!(service.pwd.verify_password("secret", &user.password).is_ok());
        assert_eq!(files(&dir), 0);
    }

    #[tokio::test]
    async fn test_register_with_image() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(Arc::new(MemoryStore::default()), &dir);

        let user = service
            .register(registration(Some("secret")), Some(upload()))
            .await
            .unwrap();

        let image = user.image.unwrap();
        assert!(image.ends_with("-avatar.png"));
        assert_eq!(std::fs::read(dir.path().join(image)).unwrap(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_missing_password_removes_upload() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(Arc::new(MemoryStore::default()), &dir);

        let result = service.register(registration(None), Some(upload())).await;

        assert!(matches!(result, Err(ServerError::Validation(_))));
        assert_eq!(files(&dir), 0);
        assert!(service.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_keeps_upload_without_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(Arc::new(BrokenStore), &dir).cleanup_on_failure(false);

        let result = service
            .register(registration(Some("secret")), Some(upload()))
            .await;

        assert!(matches!(result, Err(ServerError::Database(_))));
        assert_eq!(files(&dir), 1);
    }

    #[tokio::test]
    async fn test_store_failure_removes_upload() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(Arc::new(BrokenStore), &dir);

        let result = service
            .register(registration(Some("secret")), Some(upload()))
            .await;

        assert!(matches!(result, Err(ServerError::Database(_))));
        assert_eq!(files(&dir), 0);
    }

    #[tokio::test]
    async fn test_list_returns_every_user() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(Arc::new(MemoryStore::default()), &dir);

        for i in 0..5 {
            let mut registration = registration(Some("secret"));
            registration.name = Some(format!("user{i}"));
            service.register(registration, None).await.unwrap();
        }

        assert_eq!(service.list().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_concurrent_registrations() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(Arc::new(MemoryStore::default()), &dir);

        let (first, second) = tokio::join!(
            service.register(registration(Some("one")), None),
            service.register(
                Registration {
                    name: Some("Grace".into()),
                    ..registration(Some("two"))
                },
                Some(upload())
            ),
        );
        let (first, second) = (first.unwrap(), second.unwrap());

        let users = service.list().await.unwrap();
        assert_eq!(users.len(), 2);
        assert!(users.contains(&first));
        assert!(users.contains(&second));
    }

    #[tokio::test]
    async fn test_cancelled_registration_removes_upload() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(Arc::new(StalledStore), &dir);

        let result = tokio::time::timeout(
            Duration::from_millis(500),
            service.register(registration(Some("secret")), Some(upload())),
        )
        .await;
        assert!(result.is_err());

        // Removal runs on a spawned task.
        for _ in 0..100 {
            if files(&dir) == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(files(&dir), 0);
    }

    #[tokio::test]
    async fn test_cancelled_registration_keeps_upload_without_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(Arc::new(StalledStore), &dir).cleanup_on_failure(false);

        let result = tokio::time::timeout(
            Duration::from_millis(500),
            service.register(registration(Some("secret")), Some(upload())),
        )
        .await;
        assert!(result.is_err());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(files(&dir), 1);
    }
}
