pub mod bridge;
pub mod hub;
pub mod transport;

pub use bridge::*;
pub use hub::*;
pub use transport::*;
