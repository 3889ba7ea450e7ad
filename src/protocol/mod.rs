pub mod auth;
pub mod frame;
pub mod result;
pub mod value;
