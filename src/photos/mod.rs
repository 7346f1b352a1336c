mod likes;
mod photoset;
mod store;

pub use likes::LikeLedger;
pub use photoset::{PhotosetEngine, RecomputePermit, RecomputeRegistry};
pub use store::PhotoStore;

pub(crate) use store::map_photo_row;
