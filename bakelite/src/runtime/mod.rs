//! High-level engine runtime.
//!
//! `BakeliteRuntime` is the main entry point: it owns the engine home
//! (layout, lock, database, blob store, package cache) and exposes image
//! builds and container lifecycle operations.

pub mod layout;
mod lock;
pub mod options;
pub mod types;

use std::path::Path;
use std::sync::Arc;

use bakelite_shared::errors::{BakeliteError, BakeliteResult};
use chrono::Utc;

use crate::build::ImageBuilder;
use crate::cache::PackageCache;
use crate::container::{Container, ContainerConfig, ContainerManager};
use crate::db::{ContainerStore, Database};
use crate::logging::init_logging_for;
use crate::recipe::{DEFAULT_RECIPE_FILE, ImageRecipe};
use crate::store::{ImageRecord, ImageStore};
use crate::util::{is_process_alive, is_same_command, kill_process};
use layout::FilesystemLayout;
use lock::RuntimeLock;
pub use options::BakeliteOptions;
use types::{ContainerId, ContainerInfo, ContainerState};

/// Internal runtime state, shared via `Arc`.
pub type RuntimeInner = Arc<RuntimeInnerImpl>;

pub struct RuntimeInnerImpl {
    /// Filesystem layout (immutable after init).
    pub(crate) layout: FilesystemLayout,
    /// Container manager with integrated persistence (internal RwLock).
    pub(crate) containers: ContainerManager,
    /// Blob store + image records.
    pub(crate) images: ImageStore,
    /// Keyed package cache shared across builds.
    pub(crate) cache: PackageCache,

    /// Runtime filesystem lock (held for lifetime). Prevents multiple
    /// engine processes on the same home directory.
    _runtime_lock: RuntimeLock,
}

/// BakeliteRuntime provides the main entry point for building images and
/// running containers.
///
/// **Lock behavior**: only one runtime can use a given home directory at a
/// time; the filesystem lock is released when the runtime is dropped.
///
/// **Cloning**: cheaply cloneable via `Arc` - all clones share state.
#[derive(Clone)]
pub struct BakeliteRuntime {
    inner: RuntimeInner,
}

impl BakeliteRuntime {
    /// Create a runtime with the provided options.
    ///
    /// All setup (filesystem, lock, database, stores) completes before
    /// returning; there are no partial initialization states.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - the home directory path is not absolute
    /// - another runtime already holds the home directory lock
    /// - filesystem or database initialization fails
    pub fn new(options: BakeliteOptions) -> BakeliteResult<Self> {
        if !options.home_dir.is_absolute() {
            return Err(BakeliteError::Config(format!(
                "home_dir must be absolute path, got: {}",
                options.home_dir.display()
            )));
        }

        let layout = FilesystemLayout::new(options.home_dir);
        layout.prepare().map_err(|e| {
            BakeliteError::Storage(format!(
                "Failed to initialize filesystem at {}: {e}",
                layout.home_dir().display()
            ))
        })?;

        init_logging_for(&layout)?;

        let runtime_lock = RuntimeLock::acquire(layout.home_dir())?;

        let db = Database::open(&layout.db_path()).map_err(|e| {
            BakeliteError::Storage(format!(
                "Failed to initialize database at {}: {e}",
                layout.db_path().display()
            ))
        })?;

        let images = ImageStore::new(&layout, db.clone())?;
        let containers = ContainerManager::new(ContainerStore::new(db));
        let cache = PackageCache::new(layout.packages_cache_dir());

        let inner = Arc::new(RuntimeInnerImpl {
            layout,
            containers,
            images,
            cache,
            _runtime_lock: runtime_lock,
        });

        tracing::debug!("initialized runtime");

        let runtime = Self { inner };
        runtime.recover_containers()?;

        Ok(runtime)
    }

    /// Create a runtime with default options (`$BAKELITE_HOME` or
    /// `~/.bakelite`).
    pub fn with_defaults() -> BakeliteResult<Self> {
        Self::new(BakeliteOptions::default())
    }

    /// Build an image from a build context directory.
    ///
    /// The recipe defaults to `bakelite.json` inside the context. Returns
    /// the persisted image record.
    pub async fn build(
        &self,
        context_dir: &Path,
        recipe_path: Option<&Path>,
    ) -> BakeliteResult<ImageRecord> {
        let context_dir = context_dir.canonicalize().map_err(|e| {
            BakeliteError::Storage(format!(
                "build context not found at {}: {e}",
                context_dir.display()
            ))
        })?;
        let recipe_path = match recipe_path {
            Some(path) => path.to_path_buf(),
            None => context_dir.join(DEFAULT_RECIPE_FILE),
        };
        let recipe = ImageRecipe::load(&recipe_path)?;

        ImageBuilder::new(
            self.inner.layout.clone(),
            self.inner.images.clone(),
            self.inner.cache.clone(),
            recipe,
            context_dir,
        )?
        .build()
        .await
    }

    /// Create a container from a built image.
    ///
    /// Returns immediately with a handle; the boot pipeline runs on the
    /// first `run()` call.
    pub fn create_container(
        &self,
        image_ref: &str,
        name: Option<String>,
    ) -> BakeliteResult<Container> {
        let record = self
            .inner
            .images
            .get_record(image_ref)?
            .ok_or_else(|| BakeliteError::NotFound(format!("image {image_ref}")))?;
        let oci = self.inner.images.load_config(&record)?;
        let launch = oci
            .config()
            .as_ref()
            .ok_or_else(|| BakeliteError::Image("image has no config section".into()))?;

        let declared_port = launch
            .exposed_ports()
            .as_ref()
            .and_then(|ports| ports.first())
            .and_then(|port| port.split('/').next())
            .and_then(|port| port.parse::<u16>().ok())
            .ok_or_else(|| BakeliteError::Image("image declares no exposed port".into()))?;

        let id = ContainerId::new();
        let config = ContainerConfig {
            id: id.clone(),
            name,
            image: record.reference.clone(),
            created_at: Utc::now(),
            env: launch.env().clone().unwrap_or_default(),
            workdir: launch
                .working_dir()
                .clone()
                .unwrap_or_else(|| "/".to_string()),
            command: launch.cmd().clone().unwrap_or_default(),
            declared_port,
            storage_paths: record.storage_paths.clone(),
            container_home: self
                .inner
                .layout
                .container_layout(id.as_str())
                .root()
                .to_path_buf(),
        };

        self.inner
            .containers
            .register(config, ContainerState::new())?;

        Ok(Container::new(Arc::clone(&self.inner), id))
    }

    /// Get a handle to an existing container by id, id prefix, or name.
    pub fn container(&self, needle: &str) -> BakeliteResult<Container> {
        let id = self
            .inner
            .containers
            .resolve(needle)?
            .ok_or_else(|| BakeliteError::NotFound(needle.to_string()))?;
        Ok(Container::new(Arc::clone(&self.inner), id))
    }

    pub fn list_images(&self) -> BakeliteResult<Vec<ImageRecord>> {
        self.inner.images.list_records()
    }

    pub fn list_containers(&self) -> BakeliteResult<Vec<ContainerInfo>> {
        Ok(self
            .inner
            .containers
            .list()?
            .into_iter()
            .map(|(config, state)| ContainerInfo {
                id: config.id,
                name: config.name,
                image: config.image,
                status: state.status,
                created_at: config.created_at,
                declared_port: config.declared_port,
                exit_code: state.exit_code,
            })
            .collect())
    }

    /// Remove a container and its directory.
    ///
    /// * `force` - kill the foreground process first if running; without it
    ///   an active container is an error.
    pub fn remove_container(&self, needle: &str, force: bool) -> BakeliteResult<()> {
        let id = self
            .inner
            .containers
            .resolve(needle)?
            .ok_or_else(|| BakeliteError::NotFound(needle.to_string()))?;
        let (_config, state) = self
            .inner
            .containers
            .get(&id)?
            .ok_or_else(|| BakeliteError::NotFound(id.to_string()))?;

        if state.status.is_active() {
            if !force {
                return Err(BakeliteError::InvalidState(format!(
                    "cannot remove running container {} (use force)",
                    id.short()
                )));
            }
            if let Some(pid) = state.pid {
                tracing::info!(container = %id.short(), pid, "Force killing running container");
                kill_process(pid);
            }
            self.inner.containers.update_state(&id, |s| s.mark_crashed())?;
        }

        self.inner.containers.remove(&id)?;

        let container_layout = self.inner.layout.container_layout(id.as_str());
        if let Err(e) = container_layout.cleanup() {
            tracing::warn!(
                container = %id.short(),
                error = %e,
                "Failed to clean up container directory"
            );
        }

        tracing::info!(container = %id.short(), "Removed container");
        Ok(())
    }

    /// Remove an image record. Blobs stay in the store (they are
    /// content-addressed and may be shared); containers still referencing
    /// the image block removal.
    pub fn remove_image(&self, reference: &str) -> BakeliteResult<()> {
        let in_use = self
            .inner
            .containers
            .list()?
            .iter()
            .any(|(config, _)| config.image == reference);
        if in_use {
            return Err(BakeliteError::InvalidState(format!(
                "image {reference} is used by existing containers"
            )));
        }
        self.inner.images.remove_record(reference)?;
        tracing::info!(image = reference, "Removed image record");
        Ok(())
    }

    /// Recover containers from the database on startup.
    ///
    /// Validates recorded PIDs: a live PID running our command keeps its
    /// Running status; anything else gets marked stopped (crash detected
    /// from the outside, exit code unknown).
    fn recover_containers(&self) -> BakeliteResult<()> {
        let persisted = self.inner.containers.load_all_persisted()?;
        if persisted.is_empty() {
            return Ok(());
        }

        tracing::info!("Recovering {} containers from database", persisted.len());

        for (config, state) in persisted {
            let id = config.id.clone();
            let argv0 = config.command.first().cloned().unwrap_or_default();
            let needs_crash_mark = match state.pid {
                Some(pid) if is_process_alive(pid) && is_same_command(pid, &argv0) => false,
                Some(pid) => {
                    if state.status.is_active() {
                        tracing::warn!(
                            container = %id.short(),
                            pid,
                            "Recorded process is gone, marking container stopped"
                        );
                    }
                    state.status.is_active()
                }
                None => state.status.is_active(),
            };

            self.inner.containers.register_recovered(config, state)?;
            if needs_crash_mark {
                self.inner.containers.update_state(&id, |s| s.mark_crashed())?;
            }
        }

        tracing::info!("Container recovery complete");
        Ok(())
    }
}

impl std::fmt::Debug for BakeliteRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BakeliteRuntime")
            .field("home_dir", &self.inner.layout.home_dir())
            .finish()
    }
}

// Compile-time assertion that the runtime stays Send + Sync.
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    let _ = assert_send_sync::<BakeliteRuntime>;
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::types::ContainerStatus;
    use tempfile::TempDir;

    /// Write a minimal buildable context: scratch base, empty frozen lock,
    /// one source file.
    fn write_context(dir: &Path, command: &[&str]) {
        std::fs::create_dir_all(dir.join("app")).unwrap();
        std::fs::write(dir.join("app/main.py"), b"print('service')\n").unwrap();
        std::fs::write(dir.join("manifest.json"), br#"{ "requires": [] }"#).unwrap();
        std::fs::write(
            dir.join("manifest.lock.json"),
            br#"{ "version": 1, "packages": [] }"#,
        )
        .unwrap();

        let recipe = serde_json::json!({
            "name": "svc",
            "base": "scratch",
            "workdir": "/app",
            "env": {
                "PYTHONDONTWRITEBYTECODE": "1",
                "PYTHONUNBUFFERED": "1"
            },
            "dependencies": {
                "declaration": "manifest.json",
                "lock": "manifest.lock.json"
            },
            "storage": { "directories": ["uploads", "chroma_db"] },
            "expose": 8000,
            "command": command,
        });
        std::fs::write(
            dir.join(DEFAULT_RECIPE_FILE),
            serde_json::to_vec_pretty(&recipe).unwrap(),
        )
        .unwrap();
    }

    fn runtime(home: &Path) -> BakeliteRuntime {
        BakeliteRuntime::new(BakeliteOptions::with_home(home)).unwrap()
    }

    #[tokio::test]
    async fn build_produces_stage_layers() {
        let temp = TempDir::new().unwrap();
        let context = temp.path().join("ctx");
        write_context(&context, &["/bin/sh", "-c", "exit 0"]);

        let rt = runtime(&temp.path().join("home"));
        let record = rt.build(&context, None).await.unwrap();

        let stages: Vec<&str> = record.layers.iter().map(|l| l.stage.as_str()).collect();
        assert_eq!(stages, vec!["dependencies", "workspace", "storage"]);
        assert!(rt.list_images().unwrap().iter().any(|r| r.reference == "svc"));
    }

    #[tokio::test]
    async fn rebuild_is_deterministic_across_homes() {
        let temp = TempDir::new().unwrap();
        let context = temp.path().join("ctx");
        write_context(&context, &["/bin/sh", "-c", "exit 0"]);

        let first = runtime(&temp.path().join("home_a"))
            .build(&context, None)
            .await
            .unwrap();
        let second = runtime(&temp.path().join("home_b"))
            .build(&context, None)
            .await
            .unwrap();

        let digests = |r: &ImageRecord| -> Vec<String> {
            r.layers.iter().map(|l| l.digest.clone()).collect()
        };
        assert_eq!(digests(&first), digests(&second));
    }

    #[tokio::test]
    async fn rebuild_in_same_home_reuses_layers() {
        let temp = TempDir::new().unwrap();
        let context = temp.path().join("ctx");
        write_context(&context, &["/bin/sh", "-c", "exit 0"]);

        let home = temp.path().join("home");
        let first = {
            let rt = runtime(&home);
            rt.build(&context, None).await.unwrap()
        };
        let second = {
            let rt = runtime(&home);
            rt.build(&context, None).await.unwrap()
        };

        for (a, b) in first.layers.iter().zip(second.layers.iter()) {
            assert_eq!(a.cache_key, b.cache_key);
            assert_eq!(a.digest, b.digest);
        }
    }

    #[tokio::test]
    async fn source_edit_keeps_dependency_layer() {
        let temp = TempDir::new().unwrap();
        let context = temp.path().join("ctx");
        write_context(&context, &["/bin/sh", "-c", "exit 0"]);

        let home = temp.path().join("home");
        let first = {
            let rt = runtime(&home);
            rt.build(&context, None).await.unwrap()
        };

        std::fs::write(context.join("app/main.py"), b"print('edited')\n").unwrap();
        let second = {
            let rt = runtime(&home);
            rt.build(&context, None).await.unwrap()
        };

        assert_eq!(first.layers[0].digest, second.layers[0].digest); // dependencies
        assert_ne!(first.layers[1].digest, second.layers[1].digest); // workspace
    }

    #[tokio::test]
    async fn altered_lock_fails_the_build() {
        let temp = TempDir::new().unwrap();
        let context = temp.path().join("ctx");
        write_context(&context, &["/bin/sh", "-c", "exit 0"]);

        // Declare a requirement the lock does not pin.
        std::fs::write(
            context.join("manifest.json"),
            br#"{ "requires": [{ "name": "fastapi" }] }"#,
        )
        .unwrap();

        let rt = runtime(&temp.path().join("home"));
        let err = rt.build(&context, None).await;
        assert!(matches!(err, Err(BakeliteError::Lock(_))));
        assert!(rt.list_images().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_lock_fails_the_build() {
        let temp = TempDir::new().unwrap();
        let context = temp.path().join("ctx");
        write_context(&context, &["/bin/sh", "-c", "exit 0"]);
        std::fs::remove_file(context.join("manifest.lock.json")).unwrap();

        let rt = runtime(&temp.path().join("home"));
        assert!(matches!(
            rt.build(&context, None).await,
            Err(BakeliteError::Lock(_))
        ));
    }

    #[tokio::test]
    async fn run_records_exit_code_and_creates_storage() {
        let temp = TempDir::new().unwrap();
        let context = temp.path().join("ctx");
        write_context(&context, &["/bin/sh", "-c", "exit 7"]);

        let rt = runtime(&temp.path().join("home"));
        rt.build(&context, None).await.unwrap();

        let container = rt.create_container("svc", Some("web".into())).unwrap();
        let code = container.run().await.unwrap();
        assert_eq!(code, 7);

        let info = container.info().unwrap();
        assert_eq!(info.status, ContainerStatus::Stopped);
        assert_eq!(info.exit_code, Some(7));
        assert_eq!(info.declared_port, 8000);

        // Both storage directories exist in the rootfs even though the
        // source tree has neither.
        let rootfs = rt
            .inner
            .layout
            .container_layout(container.id().as_str())
            .rootfs_dir();
        assert!(rootfs.join("app/uploads").is_dir());
        assert!(rootfs.join("app/chroma_db").is_dir());
    }

    #[tokio::test]
    async fn restart_preserves_storage_contents() {
        let temp = TempDir::new().unwrap();
        let context = temp.path().join("ctx");
        write_context(&context, &["/bin/sh", "-c", "exit 0"]);

        let rt = runtime(&temp.path().join("home"));
        rt.build(&context, None).await.unwrap();
        let container = rt.create_container("svc", None).unwrap();
        container.run().await.unwrap();

        // Application data written under the storage prefix...
        let rootfs = rt
            .inner
            .layout
            .container_layout(container.id().as_str())
            .rootfs_dir();
        std::fs::write(rootfs.join("app/uploads/report.pdf"), b"data").unwrap();

        // ...survives a restart untouched.
        container.run().await.unwrap();
        assert_eq!(
            std::fs::read(rootfs.join("app/uploads/report.pdf")).unwrap(),
            b"data"
        );
    }

    #[tokio::test]
    async fn broken_entry_command_fails_instead_of_hanging() {
        let temp = TempDir::new().unwrap();
        let context = temp.path().join("ctx");
        write_context(&context, &["/nonexistent/entrypoint"]);

        let rt = runtime(&temp.path().join("home"));
        rt.build(&context, None).await.unwrap();

        let container = rt.create_container("svc", None).unwrap();
        assert!(matches!(
            container.run().await,
            Err(BakeliteError::Launch(_))
        ));
    }

    #[tokio::test]
    async fn stopped_container_removes_by_name() {
        let temp = TempDir::new().unwrap();
        let context = temp.path().join("ctx");
        write_context(&context, &["/bin/sh", "-c", "exit 0"]);

        let rt = runtime(&temp.path().join("home"));
        rt.build(&context, None).await.unwrap();
        let container = rt.create_container("svc", Some("web".into())).unwrap();
        container.run().await.unwrap();

        // Stopped container removes cleanly by name.
        rt.remove_container("web", false).unwrap();
        assert!(rt.list_containers().unwrap().is_empty());
    }

    #[tokio::test]
    async fn image_removal_blocked_while_in_use() {
        let temp = TempDir::new().unwrap();
        let context = temp.path().join("ctx");
        write_context(&context, &["/bin/sh", "-c", "exit 0"]);

        let rt = runtime(&temp.path().join("home"));
        rt.build(&context, None).await.unwrap();
        let _container = rt.create_container("svc", None).unwrap();

        assert!(matches!(
            rt.remove_image("svc"),
            Err(BakeliteError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn containers_survive_engine_restart() {
        let temp = TempDir::new().unwrap();
        let context = temp.path().join("ctx");
        write_context(&context, &["/bin/sh", "-c", "exit 5"]);
        let home = temp.path().join("home");

        let container_id = {
            let rt = runtime(&home);
            rt.build(&context, None).await.unwrap();
            let container = rt.create_container("svc", Some("web".into())).unwrap();
            container.run().await.unwrap();
            container.id().clone()
        };

        let rt = runtime(&home);
        let infos = rt.list_containers().unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].id.as_str(), container_id.as_str());
        assert_eq!(infos[0].status, ContainerStatus::Stopped);
        assert_eq!(infos[0].exit_code, Some(5));
    }
}
