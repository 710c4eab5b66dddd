pub mod movement;
pub mod product;

pub use movement::*;
pub use product::*;
