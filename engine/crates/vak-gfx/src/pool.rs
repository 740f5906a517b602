pub mod handle;
pub mod handle_pool;
