pub mod asset;
pub mod finding;
pub mod scan;
pub mod tool_result;

pub use asset::*;
pub use finding::*;
pub use scan::*;
pub use tool_result::*;
