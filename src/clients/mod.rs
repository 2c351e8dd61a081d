pub mod database;
pub mod email;
pub mod health;
pub mod redis;
