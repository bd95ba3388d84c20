// Domain-layer modules and shared errors/models
pub mod csv_ingestor {
    pub use crate::csv_ingestor::*;
}

pub mod extraction_schema {
    pub use crate::extraction_schema::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod session {
    pub use crate::session::*;
}

pub mod errors {
    pub use crate::errors::*;
}
