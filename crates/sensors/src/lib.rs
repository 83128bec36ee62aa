pub mod endpoints;
pub mod rhd2000;
pub mod transport;
pub mod types;

#[cfg(feature = "mock_board")]
pub mod mock_board;

// Re-export the main types that users need
pub use rhd2000::{ChipIdentity, ChipModel, Command, RegisterImage};
pub use transport::Transport;
pub use types::AcquisitionDevice;
