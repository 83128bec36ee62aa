pub mod rhythm;
pub use rhythm::{BoardController, ScanReport};
