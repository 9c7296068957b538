pub mod binding;
pub mod redis_connection;

pub use redis_connection::RedisDatabase;
