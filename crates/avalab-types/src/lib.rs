pub mod api;
pub mod events;
pub mod members;
pub mod models;

pub use members::MemberSet;
