mod temp;
pub use temp::*;

mod axml;
pub use axml::*;
