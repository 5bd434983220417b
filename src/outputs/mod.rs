//! Output generation: Parquet encoding and staging in object storage.
//!
//! # Submodules
//!
//! - [`columnar`]: encodes a batch of normalized records as a Parquet file
//! - [`staging`]: writes the file locally, uploads it, confirms it, cleans up
//!
//! # Output Structure
//!
//! ```text
//! <bucket>/
//! └── <base-path>/
//!     └── 2025-10-03/
//!         └── 20251003T000000Z.parquet
//!
//! <staging-dir>/            # only while an upload is pending or after it failed
//! └── 2025-10-03/
//!     └── 20251003T000000Z.parquet
//! ```

pub mod columnar;
pub mod staging;
