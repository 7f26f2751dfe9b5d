pub mod multi_step;
pub mod reindex;

pub use multi_step::*;
pub use reindex::{BarcodeInput, CompleteReindex, IndexKitMapping, SelectLibraries};
