// Core module: Protocol definitions, header codec and objects (NO I/O dependencies)
pub mod types;
pub mod error;
pub mod header;
pub mod protocol;
pub mod object;

pub use types::*;
pub use error::*;
pub use header::*;
pub use protocol::*;
pub use object::*;
