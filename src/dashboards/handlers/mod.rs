mod summary;

pub use summary::*;
