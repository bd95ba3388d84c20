//! External service integrations.

pub mod gemini_client {
    pub use crate::gemini_client::*;
}

pub mod extraction_service {
    pub use crate::extraction_service::*;
}
