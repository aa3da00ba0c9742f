//! Controllers of the web APIs.
//!
//! Each controller takes a [`DatasetsContext`](crate::server::DatasetsContext)
//! and returns an [`ApiResult`](crate::server::ApiResult), leaving transport
//! concerns to the embedding HTTP server.

pub mod coverages;
pub mod s3;
pub mod stac;
pub mod statistics;
pub mod wmts;

pub use coverages::{CoverageData, CoverageRequest, CoverageScaling};
pub use s3::{ListBucketParams, ListBucketResult, ListVersion};
pub use statistics::compute_statistics;
pub use wmts::{get_wmts_capabilities_xml, WmtsCapabilities, WmtsOptions};
