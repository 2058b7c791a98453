mod handler;

pub use handler::{MeResponse, me};
