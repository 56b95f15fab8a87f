pub mod circuit_breaker;
pub mod collaborators;
pub mod database;
pub mod email;
pub mod fcm;
pub mod health;
pub mod memory;
pub mod publisher;
pub mod rbmq;
pub mod redis;
pub mod store;
pub mod template;
pub mod user;
