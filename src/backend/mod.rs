/*!
 * Store backends for the control plane's shared substrate.
 */

pub mod redis;

pub use redis::RedisStore;
