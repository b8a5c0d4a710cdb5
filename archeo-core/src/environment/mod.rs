//! Environment classification
//!
//! Maps a coordinate to an environment category, then routes the category to an
//! instrument selection and convergence quorum through the routing table.
//!
//! # Components
//! 1. **classifier** - static reference regions, pure lookup, never fails
//! 2. **routing** - category -> primary/secondary instruments + minimum_required

pub mod classifier;
pub mod routing;

pub use classifier::{EnvironmentClassifier, ReferenceRegion, UrbanArea};
pub use routing::{Route, RoutingTable};
