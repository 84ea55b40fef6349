pub mod api;
pub mod config;
pub mod descriptor;
pub mod fetch;
pub mod hash;
pub mod ssdp;
pub mod survey;
