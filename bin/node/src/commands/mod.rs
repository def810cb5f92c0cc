mod init;
mod start;

pub use init::init_config_file;
pub use start::start_node;
