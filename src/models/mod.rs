pub mod circuit_breaker;
pub mod dispatch;
pub mod email;
pub mod health;
pub mod message;
pub mod notification;
pub mod retry;
pub mod template;
