mod attribute_value;
mod big_segments;
mod bucketing;
mod config;
mod contexts;
mod detail;
mod error;
mod eval;
mod flag;
mod queries;
mod rule;
mod segment;
mod test_common;
mod util;
mod variation;

pub use attribute_value::*;
pub use big_segments::*;
pub use bucketing::bucket;
pub use config::*;
pub use contexts::attribute_reference::{Reference, ReferenceError};
pub use contexts::context::{Context, ContextError, Kind};
pub use contexts::context_builder::{ContextBuilder, MultiContextBuilder};
pub use detail::*;
pub use error::ErrorKind;
pub use eval::*;
pub use flag::*;
pub use queries::*;
pub use rule::*;
pub use segment::*;
pub use variation::*;
