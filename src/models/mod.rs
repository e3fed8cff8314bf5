pub mod dispatch;
pub mod fare;
pub mod offer;
pub mod order;
pub mod provider;
