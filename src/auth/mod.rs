pub mod device_token;
pub mod extractors;
pub mod identity;
pub mod validation;

pub use extractors::{AppState, Caller, RequestIdentity, RequireUser};
pub use identity::{authorize_owner, link_user_to_device, IdentityResolver};
pub use validation::{ValidatedUser, ValidationCodeManager};
