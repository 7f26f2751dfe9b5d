pub mod memory;
pub mod postgres;
pub mod traits;
pub mod workflow_cache;

pub use memory::*;
pub use postgres::*;
pub use traits::*;
pub use workflow_cache::*;
