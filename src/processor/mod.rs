pub mod images;
pub mod regenerator;

pub use images::{ImageCrateService, ImageService};
