//! Seam between the gate and the code that talks to a data source.

mod traits;

pub use traits::Provider;
