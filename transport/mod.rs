// Transport module: Abstract communication mechanisms
pub mod traits;
pub mod poll;
pub mod interface;
pub mod tcp;
pub mod pipe;
pub mod serial;
pub mod cdc;
pub mod usb;
pub mod binding;

pub use traits::*;
pub use interface::*;
pub use tcp::*;
pub use pipe::*;
pub use serial::*;
pub use usb::*;
pub use binding::*;
