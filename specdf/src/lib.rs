// src/lib.rs
pub mod error;
pub mod logging;

pub mod data {
    pub mod sample_file;
    pub mod request;
}
