pub mod descriptor;
pub mod filter;
pub mod population;

pub use descriptor::{
    batch, by_geo, by_hashtag, by_time, live_count, sample, Aggregate, AppendField, Apply,
    BatchOption, BatchRequest, GlobalSpec, GroupBy, GroupSpec, QueryDescriptor, SelectSpec,
    Transform, HASHTAG_LIMIT, SAMPLE_SIZE,
};
pub use filter::{build_filter, FilterSpec, Predicate, GEO_FILTER_CEILING};
pub use population::{population_target, JoinSpec};
