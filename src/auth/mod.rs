pub mod authenticator;
pub mod jwt;

pub use authenticator::{AuthPayload, ConnectionAuthenticator, ConnectionIdentity, TimelineBinding};
pub use jwt::{Claims, JwtVerifier};
