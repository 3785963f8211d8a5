pub mod inode;
pub mod path;
pub mod tree;

pub use inode::Inode;
pub use tree::Tree;
