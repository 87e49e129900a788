pub mod predictions;

pub use predictions::PredictionLedger;
