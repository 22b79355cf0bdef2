pub mod observation;
pub mod reward;

// Re-export the encoder and reward composer
pub use observation::{adapt_dimension, ObservationEncoder};
pub use reward::{RewardBreakdown, RewardComposer};
