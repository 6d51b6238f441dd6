pub mod circuit_breaker;
pub mod email;
pub mod health;
pub mod memory;
pub mod postgres;
pub mod queue;
pub mod rbmq;
pub mod store;
