pub mod accuracy;
pub mod dataset;
pub mod ini;
pub mod metrics;

pub use accuracy::*;
pub use dataset::*;
pub use ini::*;
pub use metrics::*;
