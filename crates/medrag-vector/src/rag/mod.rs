pub mod product_detector;

pub use product_detector::*;
