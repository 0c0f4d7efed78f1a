pub mod object_store;
pub mod package_source;
pub mod tool_runner;
