pub mod circuit_breaker;
pub mod collaborator;
pub mod health;
pub mod notification;
pub mod provider;
pub mod response;
pub mod retry;
pub mod status;
pub mod template;
pub mod validation;
