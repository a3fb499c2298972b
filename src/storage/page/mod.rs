mod b_plus_tree_page;
mod header_page;

pub use b_plus_tree_page::*;
pub use header_page::*;
