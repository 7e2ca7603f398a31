#![warn(clippy::pedantic)]
#![allow(
    clippy::cast_lossless,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::many_single_char_names,
    clippy::module_name_repetitions,
    clippy::too_many_lines,
    clippy::similar_names,
    clippy::doc_markdown
)]
pub mod arena;
pub mod ascent;
pub mod bodies;
pub mod engine;
pub mod flow;
pub mod graph;
pub mod math;
pub mod resource;
pub mod staging;
pub mod vessel;

pub use staging::{compute_stages, SimulationParameters, StagingResult};
