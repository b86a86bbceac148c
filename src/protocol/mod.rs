pub mod encoder;
pub mod error_shapes;
pub mod openai;
