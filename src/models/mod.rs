// --- Core Application Schemas ---
//
// Every persisted entity, its request payloads and its listing filter live in
// one submodule per resource. All of them are re-exported here so handlers
// can `use crate::models::...` without caring about the split.

mod common;

pub mod activity;
pub mod analytics;
pub mod department;
pub mod file;
pub mod subject;
pub mod user;

pub use activity::*;
pub use analytics::*;
pub use common::{
    AccountStatus, ApiResponse, Page, PageRequest, Pagination, Role, Section, matches_search,
};
pub use department::*;
pub use file::*;
pub use subject::*;
pub use user::*;
