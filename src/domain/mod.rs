pub mod measurement;
pub mod record;
pub mod scenario;
pub mod topology;
pub mod verdict;

pub use measurement::*;
pub use record::*;
pub use scenario::*;
pub use topology::*;
pub use verdict::*;
