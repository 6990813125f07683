pub mod buffer_pool;
pub mod object_pool;
