// Domain-layer modules and shared errors/models
pub mod models {
    pub use crate::models::*;
}

pub mod dedup {
    pub use crate::dedup::*;
}

pub mod enrichment {
    pub use crate::enrichment::*;
}

pub mod orchestrator {
    pub use crate::orchestrator::*;
}

pub mod errors {
    pub use crate::errors::*;
}
