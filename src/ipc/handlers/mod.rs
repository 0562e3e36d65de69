pub mod core;
pub mod exams;
pub mod forms;
pub mod options;
pub mod questions;
pub mod responses;
