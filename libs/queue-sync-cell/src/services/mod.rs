pub mod broker;
pub mod domain;
pub mod notify;
pub mod rooms;
pub mod store;
pub mod subscriber;

pub use broker::*;
pub use domain::*;
pub use notify::*;
pub use rooms::*;
pub use store::*;
pub use subscriber::*;
