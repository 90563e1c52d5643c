pub mod commands;
pub mod connection;
pub mod console;
pub mod decode;
pub mod dispatch;
pub mod memory_store;
pub mod output;
pub mod pages;
pub mod rpc;
pub mod scheduler;
pub mod schema;
pub mod value;
