// Output module - JSON encoding of grab results

pub mod bytes;
pub mod json;

pub use json::{generate_json, write_json_file};
