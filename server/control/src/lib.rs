pub mod calls;
pub mod errors;
pub mod events;
pub mod ids;
pub mod registry;

pub use calls::CallController;
pub use errors::{RelayError, RelayResult};
pub use events::CallEvent;
pub use ids::ClientName;
pub use registry::Registry;
