pub mod datasource;
pub mod model;
pub mod utils;
