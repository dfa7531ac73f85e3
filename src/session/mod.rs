//! Session negotiation.
//!
//! A translation run starts by exchanging client credentials for a
//! [`Session`] over HTTP.  The lifecycle controller only sees the
//! [`SessionNegotiator`] trait, so tests can substitute their own.

pub mod negotiator;

pub use negotiator::{
    parse_session_response, HttpNegotiator, Session, SessionError, SessionNegotiator,
};
