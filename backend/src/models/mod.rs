//! Data models for the donation backend.
//!
//! Field names serialize in camelCase to stay compatible with the mobile clients.

mod donation;
mod requests;
mod user;

pub use donation::*;
pub use requests::*;
pub use user::*;
