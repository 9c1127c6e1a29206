pub mod changes;
pub mod fs;
pub mod store;
pub mod types;
