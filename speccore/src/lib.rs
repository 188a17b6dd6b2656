// error module
pub mod error;

// data module
pub mod data {
    pub(crate) mod coerce;
    pub mod lines;
    pub mod config;
    pub mod modes;
    pub mod samples;
}

// simulation module
pub mod simulation {
    pub mod stage;
    pub mod noise;
    pub mod spectrum_model;
}

// algorithm module
pub mod algorithm {
    pub mod gauss_fit;
    pub mod peak_finder;
}
