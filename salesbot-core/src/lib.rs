pub mod config;
pub mod error;
pub mod error_utils;
pub mod mentions;
pub mod platform;
pub mod types;
pub mod vendors;

pub use config::*;
pub use error::*;
pub use error_utils::*;
pub use mentions::*;
pub use platform::*;
pub use types::*;
pub use vendors::*;
