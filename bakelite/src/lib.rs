//! Bakelite - a deterministic build-and-boot engine for single-process
//! container images.
//!
//! The build pipeline turns a source tree plus a lock artifact into a
//! content-addressed image through five strictly ordered stages (base
//! environment, frozen dependency install, workspace materialization,
//! storage initialization, launch declaration). The boot pipeline unpacks
//! an image and runs its declared command as the container's single
//! foreground process.
//!
//! # Example
//!
//! ```no_run
//! use bakelite::{BakeliteOptions, BakeliteRuntime};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = BakeliteRuntime::new(BakeliteOptions::default())?;
//! let image = runtime.build(Path::new("."), None).await?;
//! let container = runtime.create_container(&image.reference, None)?;
//! let exit_code = container.run().await?;
//! # Ok(())
//! # }
//! ```

mod build;
pub mod cache;
pub mod container;
pub(crate) mod db;
pub mod layers;
pub mod lockfile;
mod logging;
pub mod pipeline;
pub mod recipe;
pub mod runtime;
pub mod store;
mod util;

pub use bakelite_shared::errors::{BakeliteError, BakeliteResult};
pub use container::{Container, ContainerConfig};
pub use recipe::{DEFAULT_RECIPE_FILE, ImageRecipe};
pub use runtime::types::{ContainerId, ContainerInfo, ContainerState, ContainerStatus};
pub use runtime::{BakeliteOptions, BakeliteRuntime};
pub use store::{ImageRecord, LayerRecord};
