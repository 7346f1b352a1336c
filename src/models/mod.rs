mod identity;
mod like;
mod photo;
mod tags;

pub use identity::*;
pub use like::*;
pub use photo::*;
pub use tags::*;
