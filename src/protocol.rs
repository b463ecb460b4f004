//! Message vocabulary shared with the server.
//!
//! | direction | type | payload |
//! |---|---|---|
//! | out | `subscribe` / `unsubscribe` | `{channel, filter?}` |
//! | out | `login` | `{user, password}` |
//! | in  | `login-successful` | `{user, token}` |
//! | in  | `login-failed` | `{message}` |
//! | out | `logout` | `{}` |
//! | in  | `logout-successful` / `logout-failed` | `{}` / `{message}` |
//! | out | `create-objects` / `update-objects` / `delete-objects` | application-defined |
//! | in  | `failure` | `{status, message}` |
//! | in  | `welcome` | `{user, token}` |
//!
//! Every outgoing object payload carries `token` while a session exists.

/// Add a `(channel, filter)` pair server-side.
pub const SUBSCRIBE: &str = "subscribe";
/// Remove a `(channel, filter)` pair server-side.
pub const UNSUBSCRIBE: &str = "unsubscribe";

/// Credential check request.
pub const LOGIN: &str = "login";
/// Credentials accepted; carries `{user, token}`.
pub const LOGIN_SUCCESSFUL: &str = "login-successful";
/// Credentials rejected; carries `{message}`.
pub const LOGIN_FAILED: &str = "login-failed";

/// Session termination request.
pub const LOGOUT: &str = "logout";
/// Session terminated.
pub const LOGOUT_SUCCESSFUL: &str = "logout-successful";
/// Session termination refused; carries `{message}`.
pub const LOGOUT_FAILED: &str = "logout-failed";

/// Create application objects.
pub const CREATE_OBJECTS: &str = "create-objects";
/// Update application objects.
pub const UPDATE_OBJECTS: &str = "update-objects";
/// Delete application objects.
pub const DELETE_OBJECTS: &str = "delete-objects";

/// Server-reported error: `{status, message}`.
pub const FAILURE: &str = "failure";
/// Optional greeting carrying `{user, token}`.
pub const WELCOME: &str = "welcome";

/// `failure` status that invalidates the session.
pub const STATUS_UNAUTHORIZED: u64 = 401;

/// Types the client always listens for, independent of application listeners.
pub const BASELINE_TYPES: [&str; 2] = [FAILURE, WELCOME];
