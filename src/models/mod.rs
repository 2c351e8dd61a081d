pub mod delivery;
pub mod health;
pub mod message;
pub mod notification;
pub mod retry;
pub mod status;
