//! # athlinked-client
//!
//! Client side of AthLinked direct messaging: the per-tab session state
//! machine, a local view that reconciles server-pushed events, and the
//! WebSocket [`SessionController`] that speaks the event protocol.

pub mod error;
pub mod session;
pub mod transport;
pub mod view;

pub use error::ClientError;
pub use session::{Session, SessionState};
pub use transport::SessionController;
pub use view::ConversationView;
