//! Application layer for the client.
//!
//! - **`frame_dispatch`** – decides what the session does in response to
//!   each decoded frame (answer pings, start closing, count traffic).  It
//!   never touches the socket; the session carries out the action.

pub mod frame_dispatch;
