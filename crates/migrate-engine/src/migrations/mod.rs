//! Migration System
//!
//! Reading the migrations directory, the history table and applying or
//! replaying migrations against a connected target.

pub mod applier;
pub mod definitions;
pub mod history;
pub mod reader;
pub mod resetter;
pub mod source;

pub use applier::*;
pub use definitions::*;
pub use history::*;
pub use reader::*;
pub use resetter::*;
pub use source::*;
