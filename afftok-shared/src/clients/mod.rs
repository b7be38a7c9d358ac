mod db;
mod redis;

pub use db::*;
pub use redis::*;
