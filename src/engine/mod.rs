pub mod coordinator;
pub mod episode;
pub mod pipeline;
