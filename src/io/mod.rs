//! File access for document sources.

mod reader;

pub use reader::FileReader;
