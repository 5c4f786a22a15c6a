//! Article enrichment through an external metadata service.

mod metadata;

pub use metadata::{ArticleMetadata, EnrichmentError, MetadataClient};
