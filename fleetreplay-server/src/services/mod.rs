pub mod emitter;
pub mod feed;
