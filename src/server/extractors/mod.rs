mod validation_extractor;

pub use validation_extractor::*;
