//! Browser-side chat logic: the conversation state machine, its HTTP driver, the message
//! markdown parser and the viewport scroll controller.

pub mod markdown;
pub mod reconciler;
pub mod scroll;
pub mod transport;

pub use reconciler::{ ChatAvailability, ChatErrorKind, Effect, Reconciler, ReconcilerEvent, StreamStatus };
pub use transport::{ ChatSession, GatewayClient, TransportError };
