//! External service integrations.

pub mod agents {
    pub use crate::agents::*;
}

pub mod services {
    pub use crate::services::*;
}

pub mod storage {
    pub use crate::db_storage::*;
}
