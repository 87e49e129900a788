pub mod questions;

pub use questions::{QuestionFilter, QuestionOrder, QuestionRegistry};
