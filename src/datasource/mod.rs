pub mod config_parser;
pub mod file_path;
pub mod idle_monitor;
pub mod idle_source;
pub mod limits_monitor;
pub mod node_monitor;
pub mod sysfs_driver;
