pub mod paths;
pub mod timeout;
