pub mod config;
pub mod error;
pub mod message;
pub mod observability;
pub mod protocol;
pub mod run;
pub mod stream;
pub mod tools;
pub mod transport;

mod util;
