//! The client connection: lifecycle state machine and the public `WebSocket`.
//!
//! ## Connection Lifecycle
//!
//! 1. **NoConnection** - created, or aborted
//! 2. **ConnectPending** - delayed connect armed
//! 3. **SendingUpgradeRequest / ReceivingUpgradeResponse** - handshake
//! 4. **WaitingForActivity** - open, `on_open` has run
//! 5. **SendingLocalClose / SentCloseFrameLocal** - we started closing
//! 6. **ReceivedRemoteCloseFrame / SendingRemoteClose / SentCloseFrameRemote** - the peer did
//! 7. **Done** or **Error** - attempt over until the next `connect`

mod generation;
mod handlers;
mod machine;
mod state;
mod websocket;

pub use generation::{Epoch, Generation};
pub use state::ConnectionState;
pub use websocket::{WebSocket, WebSocketHandle};
