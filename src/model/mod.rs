pub mod common;
pub mod table;
pub mod user;
pub mod workflow;

pub use common::*;
pub use table::*;
pub use user::*;
pub use workflow::*;
