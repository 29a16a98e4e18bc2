//! Crux Models - datasets, files and folders on top of `crux-core`
//!
//! Every model holds the `Arc<Client>` it was created from, so a single
//! configured client is shared by everything reachable from [`Crux`].
//!
//! # Example
//!
//! ```no_run
//! use crux_models::{Crux, TransferPolicy};
//!
//! fn example() -> crux_core::Result<()> {
//!     let crux = Crux::from_env()?;
//!     let dataset = crux.get_dataset("dataset-id")?;
//!     let file = dataset.get_file("/raw/prices.csv")?;
//!     file.download("prices.csv", &TransferPolicy::default())?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod dataset;
pub mod file;
pub mod folder;
pub mod resource;
pub mod strategy;
pub mod types;

pub use api::Crux;
pub use dataset::{Dataset, LabelSearch, ListOptions, UploadOptions};
pub use file::File;
pub use folder::Folder;
pub use resource::{Resource, ResourceUpdate, TypedResource};
pub use strategy::{DownloadPath, TransferPolicy, UploadPath};
pub use types::{
    DatasetInfo, Identity, Label, LabelPredicate, MediaType, Permission, ResourceInfo, ResourceKind,
    UnsupportedMediaType,
};
