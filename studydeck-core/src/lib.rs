pub mod codec;
pub mod config;
pub mod errors;
pub mod kv;
pub mod models;
pub mod notify;
pub mod source;
pub mod store;

pub use codec::Load;
pub use config::*;
pub use errors::*;
pub use kv::{memory::MemoryKv, KeyValueStore};
pub use models::*;
pub use notify::*;
pub use source::*;
pub use store::*;
