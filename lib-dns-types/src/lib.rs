#![warn(clippy::pedantic)]
#![allow(
    clippy::match_same_arms,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::similar_names,
    clippy::wildcard_imports
)]

pub mod protocol;
