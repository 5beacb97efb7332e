pub mod builders;

pub use builders::{PolicyBuilder, TreeBuilder};
