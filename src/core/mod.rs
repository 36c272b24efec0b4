pub mod archive;
pub mod crop;
pub mod definition;
pub mod duplicate;
pub mod pipeline;
pub mod thumbnail;
