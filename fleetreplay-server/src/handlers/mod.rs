pub mod data;
pub mod replay;
pub mod stream;
