pub mod aggregator; // Resolver + enricher + caches behind one handle
pub mod api; // Typed upstream clients
pub mod cache;
pub mod config;
pub mod enricher;
pub mod error;
pub mod flights;
pub mod http;
pub mod model;
pub mod resolver;
pub mod testing; // Stub transport and test configuration
pub mod utils;

pub use aggregator::{Aggregator, ViewModel};
pub use cache::{AggregationCache, AttributeKey, CacheStats, EntityKey};
pub use config::{load_config, Config};
pub use error::{AggregationError, ErrorCategory, Result, RetryPolicy};
pub use flights::{FlightQuery, FlightSearchView};
pub use model::{Attribute, AttributeKind, CanonicalId, Coordinates, EntityKind, EntityName};
