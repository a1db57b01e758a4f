//! Extraction of metric records from model replies.

pub mod csv;
pub mod prompt;
pub mod records;
pub mod unpack;

pub use prompt::build_prompt;
pub use unpack::unpack_response;
