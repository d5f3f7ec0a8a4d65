//! Wire protocol for Warden.
//!
//! This crate defines the "language" that clients and the server speak:
//!
//! - **Types** ([`Request`], [`Response`], [`RequestKind`], payloads):
//!   the message structures that travel on the wire.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how those messages
//!   are converted to/from a single frame.
//! - **Errors** ([`ProtocolError`]): what can go wrong during
//!   encoding/decoding or classification.
//!
//! ```text
//! Transport (lines) → Protocol (Request/Response) → Session (credentials)
//! ```

mod codec;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{
    LoginData, MessageData, RegisterData, Request, RequestKind, Response,
    ResponseData, Status, ValidateData,
};
