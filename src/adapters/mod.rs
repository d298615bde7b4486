pub mod memory;
pub mod postgres;
pub mod redis_lock;

pub use memory::{InMemoryPaymentLock, InMemoryPaymentRepository};
pub use postgres::PostgresPaymentRepository;
pub use redis_lock::RedisPaymentLock;
