pub mod assignment;
pub mod expiry;
pub mod offers;
pub mod scheduler;
