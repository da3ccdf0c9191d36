pub mod cancel;
pub mod digest;
pub mod error;
pub mod node;
pub mod paranoid;
pub mod unixtime;
