pub mod fix;
pub mod health;

pub use fix::*;
pub use health::*;
