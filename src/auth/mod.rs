//! Address-authenticated client authorization.
//!
//! ```text
//! request
//!   → client_addr()            X-Forwarded-For first hop, else remote host
//!   → FcrdnsValidator::validate(common_name, addr)
//!        forward lookup of the name must contain addr
//!        reverse lookup of addr must name the same host
//!   → Ok / AuthorizationError  (detail logged, client sees a bare 403)
//! ```

pub mod address;
pub mod validator;

pub use address::{AddressError, X_FORWARDED_FOR, client_addr};
pub use validator::{AuthorizationError, FcrdnsValidator};
