pub mod barrier;
pub mod command_list;
pub mod command_ring;
pub mod push_constants;
pub mod submit_info;
