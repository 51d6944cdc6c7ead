pub mod bonus;
pub mod tour_request;
pub mod user;

pub use bonus::BonusKind;
pub use tour_request::TourStatus;
