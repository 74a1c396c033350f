pub mod user;
pub mod plan;
pub mod subscription;
pub mod payment;
pub mod deposit;
pub mod listing;

pub use user::*;
pub use plan::*;
pub use subscription::*;
pub use payment::*;
pub use deposit::*;
pub use listing::*;
