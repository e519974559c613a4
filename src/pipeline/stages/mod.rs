pub mod decision;
pub mod emergency;
pub mod prediction;
pub mod risk;
pub mod synthesis;
pub mod validation;

pub use decision::*;
pub use emergency::*;
pub use prediction::*;
pub use risk::*;
pub use synthesis::*;
pub use validation::*;
