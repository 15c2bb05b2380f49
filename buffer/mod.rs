// Buffer module: growable byte region with head and tail slack
pub mod databuf;

pub use databuf::*;
