//! Model artifact management
//!
//! Provides functionality for:
//! - Built-in model registries and their source kinds
//! - Best-effort artifact downloads
//! - Unpacking ONNX zoo archives
//! - Exporting raw model files into server archives

pub mod archive;
pub mod download;
pub mod export;
pub mod materialize;
pub mod registry;

pub use archive::extract_tar;
pub use download::{Downloader, file_name_from_url};
pub use export::{CliExportTool, ExportTool};
pub use materialize::{MetadataUrls, ModelMaterializer};
pub use registry::{ModelRegistry, ModelSource, Suite};
